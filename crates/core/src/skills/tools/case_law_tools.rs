//! # Case Law Tools
//!
//! Tools the Tier-3 investigators use to check citations against the
//! CourtListener REST API. `COURTLISTENER_API_TOKEN` is sent when set; the
//! base URL can be pointed at a mirror with `COURTLISTENER_URL`.

use radkit::macros::tool;
use radkit::tools::ToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://www.courtlistener.com";

fn base_url() -> String {
    std::env::var("COURTLISTENER_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn client() -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("COURTLISTENER_API_TOKEN") {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Token {}", token)) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
    }
    reqwest::Client::builder()
        .user_agent("citecheck-investigator/1.0")
        .timeout(std::time::Duration::from_secs(20))
        .default_headers(headers)
        .build()
}

fn text(v: &Value, key: &str) -> String {
    v.get(key).and_then(|t| t.as_str()).unwrap_or("").to_string()
}

/// Absolute link for a CourtListener relative URL
fn absolute(path: &str) -> String {
    if path.is_empty() || path.starts_with("http") {
        path.to_string()
    } else {
        format!("{}{}", DEFAULT_BASE_URL, path)
    }
}

/// Arguments for citation lookup
#[derive(Deserialize, JsonSchema)]
pub struct LookupCaseArgs {
    /// Citation text, e.g. "410 U.S. 113"
    pub citation: String,
}

/// Resolve a reporter citation to the case it belongs to
#[tool(
    description = "Look up a reporter citation (e.g. '410 U.S. 113') in a case-law database. Returns whether it exists and the matching case names and URLs."
)]
pub async fn lookup_case(args: LookupCaseArgs) -> ToolResult {
    let client = match client() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to create HTTP client: {}", e)),
    };
    let url = format!("{}/api/rest/v4/citation-lookup/", base_url());

    let response = match client
        .post(&url)
        .form(&[("text", args.citation.as_str())])
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return ToolResult::error(format!("Failed to query citation lookup: {}", e)),
    };
    let body: Value = match response.json().await {
        Ok(b) => b,
        Err(e) => return ToolResult::error(format!("Failed to parse citation lookup: {}", e)),
    };

    // One entry per citation found in the submitted text
    let matches: Vec<Value> = body
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    let clusters: Vec<Value> = entry
                        .get("clusters")
                        .and_then(|c| c.as_array())
                        .map(|clusters| {
                            clusters
                                .iter()
                                .map(|c| {
                                    json!({
                                        "case_name": text(c, "case_name"),
                                        "date_filed": text(c, "date_filed"),
                                        "url": absolute(&text(c, "absolute_url")),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    json!({
                        "citation": text(entry, "citation"),
                        "status": entry.get("status").cloned().unwrap_or(Value::Null),
                        "found": !clusters.is_empty(),
                        "cases": clusters,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ToolResult::success(json!({
        "query": args.citation,
        "found": matches.iter().any(|m| m["found"] == json!(true)),
        "matches": matches,
    }))
}

/// Arguments for opinion search
#[derive(Deserialize, JsonSchema)]
pub struct SearchCaseLawArgs {
    /// Free-text query, e.g. party names or a holding
    pub query: String,
    /// Maximum number of results (default: 5)
    pub max_results: Option<u32>,
}

/// Search published opinions
#[tool(
    description = "Search published court opinions by free text (party names, holdings, courts). Returns case names, citations, dates and URLs."
)]
pub async fn search_case_law(args: SearchCaseLawArgs) -> ToolResult {
    let max_results = args.max_results.unwrap_or(5) as usize;
    let client = match client() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to create HTTP client: {}", e)),
    };
    let url = format!(
        "{}/api/rest/v4/search/?type=o&q={}",
        base_url(),
        urlencoding::encode(&args.query)
    );

    match client.get(&url).send().await {
        Ok(response) => match response.json::<Value>().await {
            Ok(body) => {
                let results: Vec<Value> = body
                    .get("results")
                    .and_then(|r| r.as_array())
                    .map(|arr| {
                        arr.iter()
                            .take(max_results)
                            .map(|r| {
                                json!({
                                    "case_name": text(r, "caseName"),
                                    "court": text(r, "court"),
                                    "date_filed": text(r, "dateFiled"),
                                    "citations": r.get("citation").cloned().unwrap_or(Value::Null),
                                    "url": absolute(&text(r, "absolute_url")),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                ToolResult::success(json!({
                    "query": args.query,
                    "results": results
                }))
            }
            Err(e) => ToolResult::error(format!("Failed to parse search response: {}", e)),
        },
        Err(e) => ToolResult::error(format!("Failed to search case law: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_links() {
        assert_eq!(
            absolute("/opinion/108713/roe-v-wade/"),
            "https://www.courtlistener.com/opinion/108713/roe-v-wade/"
        );
        assert_eq!(absolute("https://x.test/a"), "https://x.test/a");
        assert_eq!(absolute(""), "");
    }

    #[test]
    fn test_text_field_defaults_to_empty() {
        let v = json!({"case_name": "Roe v. Wade", "id": 3});
        assert_eq!(text(&v, "case_name"), "Roe v. Wade");
        assert_eq!(text(&v, "id"), "");
        assert_eq!(text(&v, "missing"), "");
    }
}
