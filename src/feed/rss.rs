use chrono::{DateTime, Datelike, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

use super::error::FeedError;
use crate::storage::Episode;
use crate::util::{find_invalid_xml_char, format_duration, resolve_url};

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// MIME type advertised for every enclosure.
pub const ENCLOSURE_TYPE: &str = "audio/mpeg";

/// Channel-level metadata for a podcast feed.
///
/// Deserialized from the `[channel]` and `[feeds.<key>]` config tables; any
/// subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMetadata {
    pub title: String,
    pub description: String,
    /// Public site URL. Relative enclosure URLs resolve against it.
    pub site_url: String,
    /// Externally reachable URL of the served feed document.
    pub feed_url: String,
    pub author: String,
    pub language: String,
    pub copyright: Option<String>,
    /// Apple Podcasts category, e.g. "Technology"
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub explicit: bool,
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            title: "Podcast".to_string(),
            description: "Automatically generated podcast feed".to_string(),
            site_url: "http://localhost:3000".to_string(),
            feed_url: "http://localhost:3000/api/rss".to_string(),
            author: "castfeed".to_string(),
            language: "en".to_string(),
            copyright: None,
            category: None,
            image_url: None,
            explicit: false,
        }
    }
}

impl ChannelMetadata {
    /// The statically configured feed URL.
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }
}

/// Renders the live set of a feed as an RSS 2.0 podcast document.
///
/// `episodes` must already be in feed order (newest first); they are written
/// as given. `generated_at` only appears in `<lastBuildDate>`, so two renders
/// of the same input with the same `generated_at` are byte-identical.
///
/// Enclosures carry `type="audio/mpeg"` and a `length` equal to the episode
/// duration in seconds; `length` is omitted when the duration is unknown.
///
/// # Errors
///
/// Returns `FeedError::Serialization` without producing any output if the
/// channel or any episode has a blank title, an enclosure or channel URL
/// that does not resolve to http(s), or text containing characters XML 1.0
/// cannot represent.
pub fn render_feed(
    channel: &ChannelMetadata,
    episodes: &[Episode],
    generated_at: DateTime<Utc>,
) -> Result<String, FeedError> {
    check_channel(channel)?;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    rss.push_attribute(("xmlns:atom", ATOM_NS));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    write_text(&mut writer, "title", &channel.title)?;
    write_text(&mut writer, "link", &channel.site_url)?;
    write_text(&mut writer, "description", &channel.description)?;
    write_text(&mut writer, "language", &channel.language)?;
    if let Some(copyright) = &channel.copyright {
        write_text(&mut writer, "copyright", copyright)?;
    }
    write_text(
        &mut writer,
        "lastBuildDate",
        &rfc2822("lastBuildDate", generated_at)?,
    )?;

    let mut self_link = BytesStart::new("atom:link");
    self_link.push_attribute(("href", channel.feed_url.as_str()));
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("type", "application/rss+xml"));
    writer.write_event(Event::Empty(self_link))?;

    write_text(&mut writer, "itunes:author", &channel.author)?;
    write_text(&mut writer, "itunes:summary", &channel.description)?;
    write_text(&mut writer, "itunes:explicit", explicit_flag(channel.explicit))?;
    if let Some(image) = &channel.image_url {
        let mut el = BytesStart::new("itunes:image");
        el.push_attribute(("href", image.as_str()));
        writer.write_event(Event::Empty(el))?;
    }
    if let Some(category) = &channel.category {
        let mut el = BytesStart::new("itunes:category");
        el.push_attribute(("text", category.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    for episode in episodes {
        write_item(&mut writer, channel, episode)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes)
        .map_err(|e| FeedError::Serialization(format!("rendered feed is not UTF-8: {e}")))
}

/// Renders the feed and, when `output` is given, atomically replaces the
/// document at that path.
///
/// A render failure returns before the filesystem is touched, so the last
/// good document stays in place.
pub fn render_and_write(
    channel: &ChannelMetadata,
    episodes: &[Episode],
    generated_at: DateTime<Utc>,
    output: Option<&Path>,
) -> Result<String, FeedError> {
    let xml = render_feed(channel, episodes, generated_at)?;
    if let Some(path) = output {
        write_feed(path, &xml)?;
        tracing::info!(path = %path.display(), items = episodes.len(), "Wrote feed document");
    }
    Ok(xml)
}

/// Writes a feed document atomically.
///
/// The content goes to a uniquely named temporary file in the same
/// directory, is synced to disk, then renamed over `path`. Readers polling
/// the served file see either the previous document or the new one.
pub fn write_feed(path: &Path, xml: &str) -> Result<(), FeedError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        std::io::Write::write_all(&mut file, xml.as_bytes())?;
        file.sync_all()?;
        drop(file);

        // On Windows, rename fails if destination exists
        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        std::fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        tracing::error!(path = %path.display(), error = %e, "Failed to write feed document");
        return Err(FeedError::Io(e));
    }
    Ok(())
}

/// Stable, non-permalink guid: unique per feed URL and episode id.
pub fn episode_guid(feed_url: &str, episode: &Episode) -> String {
    let input = format!("{}|{}", feed_url, episode.id);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn write_item<W: std::io::Write>(
    writer: &mut Writer<W>,
    channel: &ChannelMetadata,
    episode: &Episode,
) -> Result<(), FeedError> {
    if episode.title.trim().is_empty() {
        return Err(FeedError::Serialization(format!(
            "episode {} has an empty title",
            episode.id
        )));
    }
    check_text(&format!("episode {} title", episode.id), &episode.title)?;
    check_text(
        &format!("episode {} description", episode.id),
        &episode.description,
    )?;
    let enclosure_url = resolve_url(&episode.enclosure_url, Some(&channel.site_url))
        .map_err(|e| {
            FeedError::Serialization(format!(
                "episode {} enclosure URL {:?}: {e}",
                episode.id, episode.enclosure_url
            ))
        })?;
    let pub_date = rfc2822(
        &format!("episode {} published_at", episode.id),
        episode.published_at,
    )?;

    writer.write_event(Event::Start(BytesStart::new("item")))?;

    write_text(writer, "title", &episode.title)?;
    write_text(writer, "description", &episode.description)?;

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("url", enclosure_url.as_str()));
    enclosure.push_attribute(("type", ENCLOSURE_TYPE));
    if let Some(seconds) = episode.duration_seconds {
        enclosure.push_attribute(("length", seconds.to_string().as_str()));
    }
    writer.write_event(Event::Empty(enclosure))?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    writer.write_event(Event::Start(guid))?;
    writer.write_event(Event::Text(BytesText::new(&episode_guid(
        &channel.feed_url,
        episode,
    ))))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;

    write_text(writer, "pubDate", &pub_date)?;
    if let Some(seconds) = episode.duration_seconds {
        write_text(writer, "itunes:duration", &format_duration(seconds))?;
    }
    write_text(writer, "itunes:explicit", explicit_flag(channel.explicit))?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn write_text<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), FeedError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// RFC 2822 only has four-digit years.
fn rfc2822(field: &str, at: DateTime<Utc>) -> Result<String, FeedError> {
    if !(0..=9999).contains(&at.year()) {
        return Err(FeedError::Serialization(format!(
            "{field} {at} cannot be written as an RFC 2822 date"
        )));
    }
    Ok(at.to_rfc2822())
}

fn check_channel(channel: &ChannelMetadata) -> Result<(), FeedError> {
    if channel.title.trim().is_empty() {
        return Err(FeedError::Serialization("channel title is empty".to_string()));
    }
    for (field, value) in [
        ("channel title", channel.title.as_str()),
        ("channel description", channel.description.as_str()),
        ("channel author", channel.author.as_str()),
        ("channel language", channel.language.as_str()),
    ] {
        check_text(field, value)?;
    }
    if let Some(copyright) = &channel.copyright {
        check_text("channel copyright", copyright)?;
    }
    if let Some(category) = &channel.category {
        check_text("channel category", category)?;
    }
    for (field, value) in [
        ("site_url", Some(channel.site_url.as_str())),
        ("feed_url", Some(channel.feed_url.as_str())),
        ("image_url", channel.image_url.as_deref()),
    ] {
        if let Some(value) = value {
            resolve_url(value, None).map_err(|e| {
                FeedError::Serialization(format!("channel {field} {value:?}: {e}"))
            })?;
        }
    }
    Ok(())
}

fn check_text(field: &str, value: &str) -> Result<(), FeedError> {
    match find_invalid_xml_char(value) {
        Some(c) => Err(FeedError::Serialization(format!(
            "{field} contains character U+{:04X} not allowed in XML",
            c as u32
        ))),
        None => Ok(()),
    }
}

fn explicit_flag(explicit: bool) -> &'static str {
    if explicit {
        "true"
    } else {
        "false"
    }
}
