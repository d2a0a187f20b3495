//! Extended M3U reader and writer.
//!
//! Parsing is best-effort: garbled or partial input never fails, it yields
//! whatever channels can be recovered. Serialization regenerates every
//! directive from structured fields, so `parse(serialize(parse(x)))` is
//! structurally equal to `parse(x)`.

use std::fmt::Write;

use tracing::debug;

use super::channel::{strip_prefix_ignore_case, Channel, UNGROUPED};
use super::header::Header;

const MARKER: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF";
const EXTGRP: &str = "#EXTGRP:";
const PLAYLIST_NAME: &str = "#PLAYLIST:";

const ATTR_TVG_ID: &str = "tvg-id";
const ATTR_TVG_NAME: &str = "tvg-name";
const ATTR_TVG_LOGO: &str = "tvg-logo";
const ATTR_GROUP: &str = "group-title";
const EPG_ATTRS: [&str; 2] = ["url-tvg", "x-tvg-url"];

struct Draft {
    channel: Channel,
    url_lines: Vec<String>,
    has_group_title: bool,
    line_no: usize,
    valid: bool,
}

impl Draft {
    fn finish(self, out: &mut Vec<Channel>) {
        if !self.valid {
            debug!(line = self.line_no, "Skipping channel directive without a name");
            return;
        }
        let mut channel = self.channel;
        channel.url = self.url_lines.join("\n");
        out.push(channel);
    }
}

/// Parse playlist text into its header and channels, in file order.
pub fn parse(text: &str) -> (Header, Vec<Channel>) {
    let mut header = Header {
        has_marker: false,
        ..Header::default()
    };
    let mut channels = Vec::new();
    let mut current: Option<Draft> = None;
    let mut in_header = true;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if strip_prefix_ignore_case(line, EXTINF).is_some() {
            if let Some(draft) = current.take() {
                draft.finish(&mut channels);
            }
            in_header = false;
            current = Some(parse_directive(line, idx + 1));
            continue;
        }

        if line.starts_with('#') {
            match current.as_mut() {
                Some(draft) => match strip_prefix_ignore_case(line, EXTGRP) {
                    Some(group) if !draft.has_group_title => draft.channel.set_group(group),
                    _ => draft.channel.push_vendor_option(raw),
                },
                None if in_header => parse_header_line(&mut header, line),
                None => debug!(line = idx + 1, "Dropping directive outside any channel"),
            }
            continue;
        }

        match current.as_mut() {
            Some(draft) => draft.url_lines.push(line.to_string()),
            None => {
                in_header = false;
                channels.push(Channel::new(name_from_url(line), line));
            }
        }
    }

    if let Some(draft) = current.take() {
        draft.finish(&mut channels);
    }

    debug!(channels = channels.len(), "Parsed playlist");
    (header, channels)
}

/// Render a header and channels back to playlist text.
pub fn serialize(header: &Header, channels: &[Channel]) -> String {
    let mut out = String::new();

    if header.needs_marker() {
        out.push_str(MARKER);
        for epg in &header.epg_sources {
            write_attr(&mut out, EPG_ATTRS[0], epg);
        }
        for (key, value) in &header.attributes {
            write_attr(&mut out, key, value);
        }
        out.push('\n');
    }
    if let Some(name) = header.name.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "{}{}", PLAYLIST_NAME, name.trim());
    }
    for line in &header.extra_lines {
        out.push_str(line);
        out.push('\n');
    }

    for channel in channels {
        write_channel(&mut out, channel);
    }
    out
}

fn write_channel(out: &mut String, channel: &Channel) {
    let duration = if channel.duration.trim().is_empty() {
        "-1"
    } else {
        channel.duration.trim()
    };
    out.push_str(EXTINF);
    out.push(':');
    out.push_str(duration);

    if !channel.tvg_id.is_empty() {
        write_attr(out, ATTR_TVG_ID, &channel.tvg_id);
    }
    for (key, value) in &channel.extra_attrs {
        write_attr(out, key, value);
    }
    if !channel.tvg_logo.is_empty() {
        write_attr(out, ATTR_TVG_LOGO, &channel.tvg_logo);
    }
    // An EXTGRP line kept verbatim would otherwise be read back as the group.
    let keeps_extgrp = channel
        .raw_options()
        .iter()
        .any(|l| strip_prefix_ignore_case(l.trim(), EXTGRP).is_some());
    if channel.group() != UNGROUPED || keeps_extgrp {
        write_attr(out, ATTR_GROUP, channel.group());
    }
    let _ = writeln!(out, ",{}", channel.name.trim());

    for option in channel.vendor_options() {
        out.push_str(&option);
        out.push('\n');
    }

    out.push_str(channel.url.trim_end());
    out.push('\n');
}

fn parse_directive(line: &str, line_no: usize) -> Draft {
    let body = strip_prefix_ignore_case(line, EXTINF).unwrap_or(line);
    let body = body.strip_prefix(':').unwrap_or(body).trim_start();

    let mut duration_end = body
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(body.len());
    // `#EXTINF:tvg-id="x",Name` carries no duration at all
    if body[..duration_end].contains('=') {
        duration_end = 0;
    }
    let duration = &body[..duration_end];
    let (attrs, name) = split_attributes(&body[duration_end..]);

    let mut channel = Channel::default();
    if !duration.is_empty() {
        channel.duration = duration.to_string();
    }

    let mut has_group_title = false;
    let mut tvg_name = None;
    for (key, value) in attrs {
        if key.eq_ignore_ascii_case(ATTR_TVG_ID) {
            channel.tvg_id = value;
        } else if key.eq_ignore_ascii_case(ATTR_TVG_LOGO) {
            channel.tvg_logo = value;
        } else if key.eq_ignore_ascii_case(ATTR_GROUP) {
            has_group_title = true;
            channel.set_group(value);
        } else {
            if key.eq_ignore_ascii_case(ATTR_TVG_NAME) {
                tvg_name = Some(value.clone());
            }
            channel.extra_attrs.push((key, value));
        }
    }

    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| tvg_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()));
    let valid = name.is_some();
    channel.name = name.unwrap_or_default();

    Draft {
        channel,
        url_lines: Vec::new(),
        has_group_title,
        line_no,
        valid,
    }
}

fn parse_header_line(header: &mut Header, line: &str) {
    if let Some(rest) = strip_prefix_ignore_case(line, MARKER) {
        header.has_marker = true;
        let (attrs, _) = split_attributes(rest);
        for (key, value) in attrs {
            if EPG_ATTRS.iter().any(|a| key.eq_ignore_ascii_case(a)) {
                for url in value.split(',') {
                    header.add_epg_source(url);
                }
            } else {
                header.set_attribute(key, value);
            }
        }
    } else if let Some(name) = strip_prefix_ignore_case(line, PLAYLIST_NAME) {
        let name = name.trim();
        if !name.is_empty() {
            header.name = Some(name.to_string());
        }
    } else {
        header.extra_lines.push(line.to_string());
    }
}

/// Split `key="value" key2=value2,Display Name` into attributes and the
/// text after the first unquoted comma.
fn split_attributes(s: &str) -> (Vec<(String, String)>, Option<&str>) {
    let bytes = s.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b',' => return (attrs, Some(&s[i + 1..])),
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let key_start = i;
                while i < bytes.len()
                    && bytes[i] != b'='
                    && bytes[i] != b','
                    && !bytes[i].is_ascii_whitespace()
                {
                    i += 1;
                }
                let key = &s[key_start..i];
                if i >= bytes.len() || bytes[i] != b'=' {
                    continue;
                }
                i += 1;

                let value = if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                    let quote = bytes[i];
                    let start = i + 1;
                    match s[start..].bytes().position(|b| b == quote) {
                        Some(len) => {
                            i = start + len + 1;
                            &s[start..start + len]
                        }
                        None => {
                            i = bytes.len();
                            &s[start..]
                        }
                    }
                } else {
                    let start = i;
                    while i < bytes.len() && bytes[i] != b',' && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    &s[start..i]
                };

                if !key.is_empty() {
                    attrs.push((key.to_string(), value.trim().to_string()));
                }
            }
        }
    }

    (attrs, None)
}

fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty() && !seg.contains(':'))
        .unwrap_or(url)
        .to_string()
}

/// Write ` key="value"`, falling back to single quotes for values that
/// contain a double quote. Only a value holding both kinds is altered.
fn write_attr(out: &mut String, key: &str, value: &str) {
    if !value.contains('"') {
        let _ = write!(out, " {}=\"{}\"", key, value);
    } else if !value.contains('\'') {
        let _ = write!(out, " {}='{}'", key, value);
    } else {
        let _ = write!(out, " {}=\"{}\"", key, value.replace('"', "'"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::channel::UNGROUPED;

    const SAMPLE: &str = r#"#EXTM3U url-tvg="http://epg.one/guide.xml,http://epg.two/guide.xml" catchup="shift"
#PLAYLIST:My Channels
#EXT-X-SESSION-DATA:DATA-ID="com.example"
#EXTINF:-1 tvg-id="cnn.us" tvg-name="CNN" tvg-logo="http://logo/cnn.png" group-title="News",CNN International
#EXTVLCOPT:http-user-agent=Mozilla/5.0
#EXTVLCOPT:http-referrer=http://cnn.com/
http://stream.example.com/cnn.m3u8

#EXTINF:0,Radio One
#KODIPROP:inputstream.adaptive.manifest_type=hls
#EXTGRP:Radio
http://radio.example.com/one
#EXTINF:-1 tvg-id="missing",
#EXTINF:-1 group-title="Movies",No Link
"#;

    #[test]
    fn parses_header_fields() {
        let (header, _) = parse(SAMPLE);
        assert!(header.has_marker);
        assert_eq!(
            header.epg_sources,
            vec!["http://epg.one/guide.xml", "http://epg.two/guide.xml"]
        );
        assert_eq!(header.attribute("catchup"), Some("shift"));
        assert_eq!(header.name.as_deref(), Some("My Channels"));
        assert_eq!(header.extra_lines, vec![r#"#EXT-X-SESSION-DATA:DATA-ID="com.example""#]);
    }

    #[test]
    fn parses_channels_and_options() {
        let (_, channels) = parse(SAMPLE);
        assert_eq!(channels.len(), 3);

        let cnn = &channels[0];
        assert_eq!(cnn.name, "CNN International");
        assert_eq!(cnn.tvg_id, "cnn.us");
        assert_eq!(cnn.tvg_logo, "http://logo/cnn.png");
        assert_eq!(cnn.group(), "News");
        assert_eq!(cnn.user_agent(), "Mozilla/5.0");
        assert_eq!(cnn.headers().get("Referer"), Some("http://cnn.com/"));
        assert_eq!(cnn.url, "http://stream.example.com/cnn.m3u8");
        assert_eq!(cnn.extra_attrs, vec![("tvg-name".to_string(), "CNN".to_string())]);

        let radio = &channels[1];
        assert_eq!(radio.duration, "0");
        assert_eq!(radio.group(), "Radio");
        assert_eq!(
            radio.raw_options(),
            &["#KODIPROP:inputstream.adaptive.manifest_type=hls".to_string()]
        );

        let no_link = &channels[2];
        assert_eq!(no_link.name, "No Link");
        assert!(!no_link.has_url());
    }

    #[test]
    fn skips_directive_without_name() {
        let (_, channels) = parse("#EXTM3U\n#EXTINF:-1 tvg-id=\"x\"\nhttp://a/1\n#EXTINF:-1,B\nhttp://b/1\n");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "B");
    }

    #[test]
    fn falls_back_to_tvg_name() {
        let (_, channels) = parse("#EXTINF:-1 tvg-name=\"Fallback\",\nhttp://a/1\n");
        assert_eq!(channels[0].name, "Fallback");
    }

    #[test]
    fn keeps_commas_in_quoted_values_and_names() {
        let (_, channels) =
            parse("#EXTINF:-1 tvg-logo=\"http://l/a,b.png\" group-title=\"A, B\",News, Weather\nhttp://a\n");
        assert_eq!(channels[0].tvg_logo, "http://l/a,b.png");
        assert_eq!(channels[0].group(), "A, B");
        assert_eq!(channels[0].name, "News, Weather");
    }

    #[test]
    fn multi_line_urls_are_kept_together() {
        let text = "#EXTINF:-1,Multi\nhttp://a/primary\nhttp://a/backup\n#EXTINF:-1,Next\nhttp://b\n";
        let (_, channels) = parse(text);
        assert_eq!(channels[0].url, "http://a/primary\nhttp://a/backup");
        assert_eq!(channels[0].primary_url(), "http://a/primary");
        assert_eq!(channels[1].url, "http://b");
    }

    #[test]
    fn bare_urls_become_channels() {
        let (header, channels) = parse("http://host/live/sport1.ts\nhttp://host/live/\n");
        assert!(!header.has_marker);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "sport1.ts");
        assert_eq!(channels[1].name, "live");
    }

    #[test]
    fn garbage_input_never_fails() {
        let (_, channels) = parse("#EXTINF\n#EXTINF:\n\u{0}\u{1}#\n#EXTINF:-1 a=\"unterminated,X\n");
        assert!(channels.iter().all(|c| !c.name.is_empty()));
    }

    #[test]
    fn roundtrip_is_structurally_stable() {
        let first = parse(SAMPLE);
        let text = serialize(&first.0, &first.1);
        let second = parse(&text);
        assert_eq!(first, second);
    }

    #[test]
    fn serialize_regenerates_directives() {
        let (header, mut channels) = parse(SAMPLE);
        channels[0].set_user_agent("Kodi/20");
        channels[0].set_group("");
        let text = serialize(&header, &channels);
        assert!(text.starts_with("#EXTM3U url-tvg=\"http://epg.one/guide.xml\" url-tvg=\"http://epg.two/guide.xml\" catchup=\"shift\"\n"));
        assert!(text.contains("#EXTVLCOPT:http-user-agent=Kodi/20\n"));
        assert!(text.contains(",CNN International\n"));
        assert!(!text.contains("group-title=\"News\""));
        assert_eq!(channels[0].group(), UNGROUPED);
        // missing URL is written as a blank line
        assert!(text.ends_with(",No Link\n\n"));
    }

    #[test]
    fn lowercase_header_lines_roundtrip() {
        let text = "#EXTINF:-1,A\n\
            #EXTVLCOPT:http-header=referer: http://r/\n\
            #EXTVLCOPT:http-header=user-agent: Kodi\n\
            http://a\n";
        let first = parse(text);
        assert_eq!(first.1[0].headers().iter().next(), Some(("Referer", "http://r/")));
        assert_eq!(first.1[0].user_agent(), "Kodi");
        let second = parse(&serialize(&first.0, &first.1));
        assert_eq!(first, second);
    }

    #[test]
    fn double_quotes_in_values_survive_roundtrip() {
        let text = "#EXTM3U note='say \"hi\"'\n\
            #EXTINF:-1 tvg-logo='http://l/a\"b.png' group-title=\"Kids\",A\n\
            http://a\n";
        let first = parse(text);
        assert_eq!(first.1[0].tvg_logo, "http://l/a\"b.png");
        let out = serialize(&first.0, &first.1);
        assert!(out.contains("tvg-logo='http://l/a\"b.png'"));
        let second = parse(&out);
        assert_eq!(first, second);

        let mut mixed = String::new();
        write_attr(&mut mixed, "k", "it's \"x\"");
        assert_eq!(mixed, " k=\"it's 'x'\"");
    }

    #[test]
    fn extgrp_kept_when_group_title_present() {
        let text = "#EXTINF:-1 group-title=\"Ungrouped\",A\n#EXTGRP:Other\nhttp://a\n";
        let first = parse(text);
        assert_eq!(first.1[0].group(), UNGROUPED);
        let second = parse(&serialize(&first.0, &first.1));
        assert_eq!(first, second);
    }
}
