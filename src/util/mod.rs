//! Utility functions shared by the feed renderer and the CLI.
//!
//! - **URL resolution**: turn stored enclosure locators into absolute http(s) URLs
//! - **Text**: podcast duration formatting and XML 1.0 character checks
//!
//! # Examples
//!
//! ```
//! use castfeed::util::{format_duration, resolve_url};
//!
//! let url = resolve_url("media/1.mp3", Some("https://example.com/show/")).unwrap();
//! assert_eq!(url.as_str(), "https://example.com/show/media/1.mp3");
//!
//! assert_eq!(format_duration(3725), "1:02:05");
//! ```

mod text;
mod url_resolver;

pub use url_resolver::{resolve_url, UrlError};
pub use text::{find_invalid_xml_char, format_duration};
