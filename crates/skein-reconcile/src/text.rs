//! Text-level cleaning primitives used by the card normaliser.
//!
//! Two normalisation strengths exist. *Soft* text is what gets stored: UI
//! boilerplate and decorative runs removed, whitespace collapsed, case and
//! line breaks kept. *Hard* text is only ever fed to the fingerprint: soft
//! text lowercased, flattened to one line, repeated punctuation folded and
//! emoji stripped.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use skein_core::card::Channel;

// ─── Vocabulary ──────────────────────────────────────────────────────────────

/// Lines that are pure interface chrome, compared lowercased.
const UI_TOKENS: &[&str] = &[
  "follow",
  "following",
  "more",
  "top",
  "translate",
  "see translation",
  "verified",
  "edited",
  "author",
  "like",
  "likes",
  "reply",
  "replies",
  "repost",
  "reposts",
  "share",
  "view more",
  "view replies",
  "view more replies",
  "view activity",
  "liked by original author",
  "作者",
  "顯示",
  "更多",
  "翻譯",
  "查看更多",
  "查看回覆",
  "查看更多回覆",
  "讚",
  "回覆",
  "轉發",
  "分享",
];

const EXPAND_CUES: &[&str] = &[
  "view replies",
  "view more replies",
  "show replies",
  "see more",
  "查看更多回覆",
  "查看回覆",
  "顯示更多回覆",
  "查看更多",
];

const DECORATIVE: &[char] =
  &['─', '━', '═', '-', '=', '~', '*', '_', '·', '•'];

const PROFILE_IMAGE_MARKERS: &[&str] =
  &["s150x150", "profile_pic", "profile", "avatar", "thumbnail"];

/// Fingerprints only look at this many characters of hard text.
pub const TEXT_HEAD_LEN: usize = 120;

static TIME_TOKEN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s*([smhdw])$").expect("valid regex"));

static COUNT_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)^\d+(?:[.,]\d+)?\s*[kmb萬万千億亿]?$").expect("valid regex")
});

static NUMBER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));

static REPLY_TARGET: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)replying to\s+@?([\w.\-]+)").expect("valid regex")
});

static BANGS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[!！]+").expect("valid regex"));

static QUESTIONS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[?？]+").expect("valid regex"));

static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"[\x{1F300}-\x{1FAFF}\x{2600}-\x{27BF}\x{FE0F}\x{200D}]")
    .expect("valid regex")
});

static CHANNEL_CUES: LazyLock<[(Channel, Regex); 4]> = LazyLock::new(|| {
  [
    (Channel::Likes, Regex::new(r"\blikes?\b|讚|赞|喜歡|喜欢")),
    (
      Channel::Replies,
      Regex::new(r"\brepl(?:y|ies)\b|\bcomments?\b|回覆|回复|留言"),
    ),
    (
      Channel::Reposts,
      Regex::new(r"\breposts?\b|\breshares?\b|\bre-share\b|轉發|转发|轉貼|转贴"),
    ),
    (Channel::Shares, Regex::new(r"\bshares?\b|分享|傳送|传送")),
  ]
  .map(|(c, r)| (c, r.expect("valid regex")))
});

// ─── Line predicates ─────────────────────────────────────────────────────────

pub fn is_ui_token(line: &str) -> bool {
  let lower = line.trim().to_lowercase();
  UI_TOKENS.contains(&lower.as_str())
}

fn is_bullet(line: &str) -> bool { matches!(line.trim(), "·" | "•") }

fn is_count_line(line: &str) -> bool { COUNT_LINE.is_match(line.trim()) }

pub fn is_time_token(s: &str) -> bool { TIME_TOKEN.is_match(s.trim()) }

/// A divider such as `────` or `~~~`. Short punctuation like `?` or `!!!` is
/// content.
fn is_decorative(line: &str) -> bool {
  let marks = line.chars().filter(|c| !c.is_whitespace());
  marks.clone().count() >= 3 && marks.clone().all(|c| DECORATIVE.contains(&c))
}

/// Lines dropped outright by soft normalisation.
fn is_chrome_line(line: &str) -> bool {
  is_ui_token(line)
    || is_bullet(line)
    || is_count_line(line)
    || is_time_token(line)
    || is_decorative(line)
}

// ─── Whitespace and decoration ───────────────────────────────────────────────

fn collapse_ws(s: &str) -> String { s.split_whitespace().collect::<Vec<_>>().join(" ") }

/// Remove runs of three or more identical decorative characters.
fn strip_decorative_runs(line: &str) -> String {
  let chars: Vec<char> = line.chars().collect();
  let mut out = String::with_capacity(line.len());
  let mut i = 0;
  while i < chars.len() {
    let c = chars[i];
    let mut j = i;
    while j < chars.len() && chars[j] == c {
      j += 1;
    }
    if !(DECORATIVE.contains(&c) && j - i >= 3) {
      out.extend(&chars[i..j]);
    }
    i = j;
  }
  out
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Storage-grade cleaning. Keeps case and line structure.
///
/// A bare number is a counter next to other lines but the whole comment when
/// it stands alone.
pub fn soft_normalize(text: &str) -> String {
  let lines: Vec<String> = text
    .lines()
    .map(collapse_ws)
    .filter(|line| !line.is_empty())
    .collect();
  let lone_count = lines.len() == 1 && is_count_line(&lines[0]);
  lines
    .into_iter()
    .filter_map(|line| {
      if is_chrome_line(&line) && !lone_count {
        return None;
      }
      let line = collapse_ws(&strip_decorative_runs(&line));
      (!line.is_empty()).then_some(line)
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Fingerprint-grade cleaning.
pub fn hard_normalize(text: &str) -> String {
  let soft = soft_normalize(text).to_lowercase();
  let flat = collapse_ws(&soft);
  let folded = BANGS.replace_all(&flat, "!");
  let folded = QUESTIONS.replace_all(&folded, "?");
  let folded = folded.replace("。。。", "。").replace("．．．", "。");
  let stripped = EMOJI.replace_all(&folded, "");
  collapse_ws(&stripped)
}

/// The leading slice of hard text that identity is derived from.
pub fn text_head(text: &str) -> String {
  hard_normalize(text).chars().take(TEXT_HEAD_LEN).collect()
}

/// Count of residual boilerplate lines. Lower is cleaner.
pub fn ui_noise_score(text: &str) -> usize {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .filter(|line| {
      is_ui_token(line)
        || is_bullet(line)
        || (line.contains(['·', '•'])
          && line.split(['·', '•']).any(|seg| is_ui_token(seg)))
    })
    .count()
}

/// Recover a body from a card's raw text when the adapter supplied none.
///
/// The first two lines are header territory; single-token lines there are
/// handles or badges rather than content.
pub fn extract_body_text(raw: &str) -> String {
  raw
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .enumerate()
    .filter(|(idx, line)| {
      !is_ui_token(line)
        && !is_bullet(line)
        && !is_count_line(line)
        && !is_time_token(line)
        && !(*idx < 2 && !line.contains(' '))
    })
    .map(|(_, line)| line)
    .collect::<Vec<_>>()
    .join("\n")
}

// ─── Counts and channels ─────────────────────────────────────────────────────

/// Parse a human-readable count such as `1.2K`, `3.4M`, `1,234`, `2.5萬`.
pub fn parse_count(label: &str) -> Option<u64> {
  let cleaned = label.replace(',', "");
  let m = NUMBER.find(&cleaned)?;
  let value: f64 = m.as_str().parse().ok()?;

  let rest = cleaned[m.end()..].trim_start();
  let mut chars = rest.chars();
  let first = chars.next();
  let second = chars.next();
  let lower = rest.to_lowercase();
  let ascii_suffix = !second.is_some_and(char::is_alphabetic);

  let multiplier = match first {
    Some('萬' | '万') => 1e4,
    Some('億' | '亿') => 1e8,
    Some('千') => 1e3,
    Some('k' | 'K') if ascii_suffix => 1e3,
    Some('m' | 'M') if ascii_suffix => 1e6,
    Some('b' | 'B') if ascii_suffix => 1e9,
    _ if lower.starts_with("thousand") => 1e3,
    _ if lower.starts_with("million") => 1e6,
    _ if lower.starts_with("billion") => 1e9,
    _ => 1.0,
  };

  Some((value * multiplier).round() as u64)
}

/// Which metric channel a label speaks about, if any.
pub fn classify_channel(label: &str) -> Option<Channel> {
  let lower = label.to_lowercase();
  CHANNEL_CUES
    .iter()
    .find(|(_, cue)| cue.is_match(&lower))
    .map(|(channel, _)| *channel)
}

/// Whether a label is a "view replies" style affordance.
pub fn is_expand_cue(label: &str) -> bool {
  let lower = label.to_lowercase();
  EXPAND_CUES.iter().any(|cue| lower.contains(cue))
}

pub fn has_expand_affordance<'a>(
  labels: impl IntoIterator<Item = &'a str>,
  raw_text: &str,
) -> bool {
  labels.into_iter().any(is_expand_cue) || is_expand_cue(raw_text)
}

// ─── Time ────────────────────────────────────────────────────────────────────

/// Canonical form of a relative time token (`"2 h"` → `"2h"`).
pub fn normalize_time_token(token: &str) -> Option<String> {
  let caps = TIME_TOKEN.captures(token.trim())?;
  Some(format!("{}{}", &caps[1], caps[2].to_lowercase()))
}

pub fn time_token_delta(token: &str) -> Option<Duration> {
  let caps = TIME_TOKEN.captures(token.trim())?;
  let n: i64 = caps[1].parse().ok()?;
  match caps[2].to_lowercase().as_str() {
    "s" => Duration::try_seconds(n),
    "m" => Duration::try_minutes(n),
    "h" => Duration::try_hours(n),
    "d" => Duration::try_days(n),
    "w" => Duration::try_weeks(n),
    _ => None,
  }
}

// ─── Handles and cues ────────────────────────────────────────────────────────

pub fn normalize_handle(handle: &str) -> String {
  let lower = handle.trim().to_lowercase();
  lower
    .strip_prefix('@')
    .unwrap_or(&lower)
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    .collect()
}

/// Handle named by a "Replying to @user" cue.
pub fn reply_target(raw: &str) -> Option<String> {
  let caps = REPLY_TARGET.captures(raw)?;
  let handle = normalize_handle(&caps[1]);
  (!handle.is_empty()).then_some(handle)
}

// ─── Images ──────────────────────────────────────────────────────────────────

fn is_profile_image(url: &str) -> bool {
  let lower = url.to_lowercase();
  url.is_empty() || PROFILE_IMAGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Order-preserving dedupe.
pub fn dedupe_urls<I, S>(urls: I) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  let mut seen = std::collections::HashSet::new();
  urls
    .into_iter()
    .map(Into::into)
    .filter(|u: &String| !u.is_empty() && seen.insert(u.clone()))
    .collect()
}

/// Drop avatars and thumbnails, then dedupe.
pub fn clean_image_urls(urls: &[String]) -> Vec<String> {
  dedupe_urls(urls.iter().filter(|u| !is_profile_image(u)).cloned())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn soft_strips_chrome_and_keeps_case() {
    let raw = "Translate\n  Hello   World  \n·\n12\n3h\nLike\n────\nSecond line";
    assert_eq!(soft_normalize(raw), "Hello World\nSecond line");
  }

  #[test]
  fn soft_strips_decorative_runs_inside_lines() {
    assert_eq!(soft_normalize("wow ~~~~ nice ***"), "wow nice");
    // Short runs are content.
    assert_eq!(soft_normalize("a -- b"), "a -- b");
  }

  #[test]
  fn hard_folds_punctuation_and_emoji() {
    assert_eq!(hard_normalize("Really!!!  Why???\nOK 😂"), "really! why? ok");
    assert_eq!(hard_normalize("好喔！！！"), "好喔!");
  }

  #[test]
  fn short_punctuation_and_lone_numbers_are_content() {
    assert_eq!(soft_normalize("?"), "?");
    assert_eq!(soft_normalize("!!!"), "!!!");
    assert_eq!(soft_normalize("100"), "100");
    assert_eq!(soft_normalize("  1.2K "), "1.2K");
    // Next to real text the same lines are chrome.
    assert_eq!(soft_normalize("nice\n100"), "nice");
    assert_eq!(soft_normalize("~~~\nnice\n= = ="), "nice");
  }

  #[test]
  fn hard_of_pure_chrome_is_empty() {
    assert_eq!(hard_normalize("Reply\nShare\n2d"), "");
  }

  #[test]
  fn text_head_is_bounded() {
    let long = "x".repeat(500);
    assert_eq!(text_head(&long).chars().count(), TEXT_HEAD_LEN);
  }

  #[test]
  fn noise_counts_residual_lines() {
    assert_eq!(ui_noise_score("hello\nworld"), 0);
    assert_eq!(ui_noise_score("Translate\nhello\n•"), 2);
    assert_eq!(ui_noise_score("alice · Author\nhello"), 1);
  }

  #[test]
  fn body_extraction_skips_header_tokens() {
    let raw = "alice\n2h\nthis is the body\nLike\n12";
    assert_eq!(extract_body_text(raw), "this is the body");
  }

  #[test]
  fn counts() {
    assert_eq!(parse_count("1.2K"), Some(1200));
    assert_eq!(parse_count("3.4M"), Some(3_400_000));
    assert_eq!(parse_count("1,234"), Some(1234));
    assert_eq!(parse_count("2.5萬"), Some(25_000));
    assert_eq!(parse_count("3千"), Some(3000));
    assert_eq!(parse_count("1亿"), Some(100_000_000));
    assert_eq!(parse_count("12 likes"), Some(12));
    assert_eq!(parse_count("12 more replies"), Some(12));
    assert_eq!(parse_count("2 thousand"), Some(2000));
    assert_eq!(parse_count("Like"), None);
  }

  #[test]
  fn channels() {
    assert_eq!(classify_channel("Like"), Some(Channel::Likes));
    assert_eq!(classify_channel("12 replies"), Some(Channel::Replies));
    assert_eq!(classify_channel("Reshare"), Some(Channel::Reposts));
    assert_eq!(classify_channel("Share"), Some(Channel::Shares));
    assert_eq!(classify_channel("轉發"), Some(Channel::Reposts));
    assert_eq!(classify_channel("More"), None);
    assert_eq!(classify_channel("unlikely"), None);
  }

  #[test]
  fn time_tokens() {
    assert_eq!(normalize_time_token("2 H").as_deref(), Some("2h"));
    assert_eq!(normalize_time_token("yesterday"), None);
    assert_eq!(time_token_delta("3d"), Duration::try_days(3));
  }

  #[test]
  fn handles_and_reply_targets() {
    assert_eq!(normalize_handle("  @Alice.B_ "), "alice.b_");
    assert_eq!(reply_target("Replying to @Alice").as_deref(), Some("alice"));
    assert_eq!(reply_target("no cue here"), None);
  }

  #[test]
  fn image_hygiene() {
    let urls = vec![
      "https://cdn/x/s150x150/a.jpg".to_string(),
      "https://cdn/p/1.jpg".to_string(),
      "https://cdn/p/1.jpg".to_string(),
      "https://cdn/avatar/2.jpg".to_string(),
    ];
    assert_eq!(clean_image_urls(&urls), vec!["https://cdn/p/1.jpg"]);
  }

  #[test]
  fn expand_cues() {
    assert!(has_expand_affordance(["View more replies"], ""));
    assert!(has_expand_affordance([], "... 查看回覆"));
    assert!(!has_expand_affordance(["Like"], "hello"));
  }
}
