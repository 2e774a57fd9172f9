use crate::error::ApiFailure;
use crate::restore::comment::{CommentKey, TargetId};
use crate::restore::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Publishes one comment and reports the remote id or a structured failure.
/// The dispatcher only sees this contract; a WBI-signing client would slot
/// in behind the same trait.
pub trait SubmitApi {
    fn submit(&self, target: &TargetId, comment: &CommentKey) -> Result<u64, ApiFailure>;
}

/// Fetches the remote comment list for a video part, normalized to the
/// same tuples the fingerprints are computed from.
pub trait CommentFeed {
    fn fetch_comments(&self, target: &TargetId) -> Result<Vec<CommentKey>, ApiFailure>;
}

const SUBMIT_URL: &str = "https://api.bilibili.com/x/v2/dm/post";
const LIST_URL: &str = "https://api.bilibili.com/x/v1/dm/list.so";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.bilibili.com/";

/// Cookie-session client against the bilibili danmaku endpoints.
#[derive(Debug)]
pub struct HttpClient {
    http: reqwest::blocking::Client,
    sessdata: String,
    bili_jct: String,
}

impl HttpClient {
    /// Credentials come from `BILI_SESSDATA` / `BILI_JCT`; managing and
    /// refreshing them is outside this tool.
    pub fn from_env() -> Result<Self> {
        let sessdata = required_env("BILI_SESSDATA")?;
        let bili_jct = required_env("BILI_JCT")?;
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            sessdata,
            bili_jct,
        })
    }

    fn cookie_header(&self) -> String {
        format!("SESSDATA={}; bili_jct={}", self.sessdata, self.bili_jct)
    }
}

fn required_env(var: &str) -> Result<String> {
    let value =
        env::var(var).with_context(|| format!("{var} is required for bilibili API access"))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{var} is required and cannot be empty");
    }
    Ok(trimmed.to_string())
}

fn transport(err: reqwest::Error) -> ApiFailure {
    ApiFailure::Transport(err.to_string())
}

impl SubmitApi for HttpClient {
    fn submit(&self, target: &TargetId, comment: &CommentKey) -> Result<u64, ApiFailure> {
        let rnd = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros().to_string())
            .unwrap_or_else(|_| "0".to_string());
        let form = [
            ("type", "1".to_string()),
            ("mode", "1".to_string()),
            ("pool", "0".to_string()),
            ("oid", target.cid.to_string()),
            ("bvid", target.bvid.clone()),
            ("msg", comment.text.clone()),
            ("progress", comment.progress_ms.to_string()),
            ("color", comment.color.to_string()),
            ("fontsize", comment.font_size.to_string()),
            ("rnd", rnd),
            ("csrf", self.bili_jct.clone()),
        ];

        let resp = self
            .http
            .post(SUBMIT_URL)
            .header(reqwest::header::COOKIE, self.cookie_header())
            .header(reqwest::header::REFERER, REFERER)
            .form(&form)
            .send()
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        let body: Value = resp.json().map_err(transport)?;

        let code = body.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = truncate_with_ellipsis(
                body.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message from remote"),
                200,
            );
            return Err(ApiFailure::Status { code, message });
        }

        body.pointer("/data/dmid")
            .and_then(Value::as_u64)
            .or_else(|| {
                body.pointer("/data/dmid_str")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
            })
            .ok_or_else(|| ApiFailure::status(-1, "success response missing dmid"))
    }
}

impl CommentFeed for HttpClient {
    fn fetch_comments(&self, target: &TargetId) -> Result<Vec<CommentKey>, ApiFailure> {
        let resp = self
            .http
            .get(LIST_URL)
            .query(&[("oid", target.cid)])
            .header(reqwest::header::COOKIE, self.cookie_header())
            .header(reqwest::header::REFERER, REFERER)
            .send()
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        let xml = resp.text().map_err(transport)?;
        Ok(parse_list_xml(&xml))
    }
}

/// Extract comment tuples from the list.so payload.
///
/// Rows look like `<d p="12.345,1,25,16777215,...">text</d>`; the attr
/// fields are progress-seconds, mode, font size, color, then metadata we
/// do not match on. Rows that fail to parse are dropped rather than
/// failing the whole fetch.
pub fn parse_list_xml(xml: &str) -> Vec<CommentKey> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<d p=\"") {
        rest = &rest[start + 6..];
        let Some(attr_end) = rest.find('"') else {
            break;
        };
        let attrs = &rest[..attr_end];
        rest = &rest[attr_end..];
        let Some(tag_end) = rest.find('>') else {
            break;
        };
        rest = &rest[tag_end + 1..];
        let Some(close) = rest.find("</d>") else {
            break;
        };
        let text = unescape_xml(&rest[..close]);
        rest = &rest[close + 4..];
        if let Some(key) = comment_from_attrs(attrs, text) {
            out.push(key);
        }
    }
    out
}

fn comment_from_attrs(attrs: &str, text: String) -> Option<CommentKey> {
    let mut fields = attrs.split(',');
    let progress_secs: f64 = fields.next()?.parse().ok()?;
    let _mode = fields.next()?;
    let font_size: u32 = fields.next()?.parse().ok()?;
    let color: u32 = fields.next()?.parse().ok()?;
    if !progress_secs.is_finite() || progress_secs < 0.0 {
        return None;
    }
    Some(CommentKey {
        text,
        progress_ms: (progress_secs * 1000.0).round() as u64,
        color,
        font_size,
    })
}

fn unescape_xml(s: &str) -> String {
    // &amp; last, so freshly produced ampersands are not re-expanded.
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::parse_list_xml;

    #[test]
    fn parses_rows_into_normalized_tuples() {
        let xml = concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><i>",
            "<d p=\"12.345,1,25,16777215,1700000000,0,abc,123456\">前方高能</d>",
            "<d p=\"0.5,4,18,255,1700000001,0,def,123457\">bottom text</d>",
            "</i>",
        );

        let got = parse_list_xml(xml);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].text, "前方高能");
        assert_eq!(got[0].progress_ms, 12_345);
        assert_eq!(got[0].color, 16_777_215);
        assert_eq!(got[0].font_size, 25);
        assert_eq!(got[1].progress_ms, 500);
        assert_eq!(got[1].color, 255);
    }

    #[test]
    fn unescapes_standard_entities() {
        let xml = "<d p=\"1.0,1,25,0,0,0,a,1\">a &lt;b&gt; &amp;&amp; &quot;c&quot;</d>";
        let got = parse_list_xml(xml);
        assert_eq!(got[0].text, "a <b> && \"c\"");
    }

    #[test]
    fn drops_malformed_rows() {
        let xml = concat!(
            "<d p=\"not-a-number,1,25,0,0,0,a,1\">bad</d>",
            "<d p=\"2.0,1,25,0,0,0,a,2\">good</d>",
        );
        let got = parse_list_xml(xml);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "good");
    }

    #[test]
    fn empty_payload_yields_no_rows() {
        assert!(parse_list_xml("<i></i>").is_empty());
    }
}
