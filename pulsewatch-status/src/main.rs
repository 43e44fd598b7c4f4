//! `pulsewatch-status`: fetches the monitor's status endpoint and prints it
//! as a table.

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Deserialize;
use std::io::IsTerminal;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const BODY_PREVIEW: usize = 512;

#[derive(Parser, Debug)]
#[command(name = "pulsewatch-status", version, about)]
struct Args {
    /// Status endpoint URL
    #[arg(long, env = "STATUS_URL", default_value = "http://127.0.0.1:8080/")]
    url: String,

    /// HTTP request timeout
    #[arg(long, env = "STATUS_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration)]
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default, with = "time::serde::rfc3339::option")]
    observed_at: Option<OffsetDateTime>,
    #[serde(default)]
    subjects: Vec<SubjectStatus>,
}

#[derive(Debug, Deserialize)]
struct SubjectStatus {
    subject: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    host: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    last_seen: Option<OffsetDateTime>,
    #[serde(default)]
    interval: String,
    #[serde(default)]
    allowed_window: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    miss_for: Option<String>,
    #[serde(default)]
    miss_count: Option<u64>,
    #[serde(default)]
    alert_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Ok,
    Late,
    Alert,
}

impl Health {
    fn label(self, color: bool) -> String {
        let text = match self {
            Health::Ok => "OK",
            Health::Late => "LATE",
            Health::Alert => "ALERT!",
        };
        if !color {
            return text.to_string();
        }
        match self {
            Health::Ok => text.green().to_string(),
            Health::Late => text.yellow().to_string(),
            Health::Alert => text.red().to_string(),
        }
    }
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "SUBJECT")]
    subject: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "LAST SEEN")]
    last_seen: String,
    #[tabled(rename = "DETAILS")]
    details: String,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn summarize(s: &SubjectStatus) -> (Health, String) {
    let beats = match s.miss_count {
        Some(n) if n > 0 => format!(" ({n} beats)"),
        _ => String::new(),
    };

    if s.alert_active {
        let missed = non_blank(s.miss_for.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("past {}", s.allowed_window));
        (Health::Alert, format!("missed {missed}{beats}"))
    } else if s.missing {
        let late = non_blank(s.miss_for.as_deref()).unwrap_or(&s.allowed_window);
        (Health::Late, format!("late by {late}{beats}"))
    } else {
        (
            Health::Ok,
            format!("interval {}, window {}", s.interval, s.allowed_window),
        )
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn render(resp: &StatusResponse, color: bool) -> String {
    let observed = resp.observed_at.unwrap_or_else(OffsetDateTime::now_utc);
    let mut out = format!("Observed at: {}\n", rfc3339(observed));

    if resp.subjects.is_empty() {
        out.push_str("No heartbeats observed yet.\n");
        return out;
    }

    let rows: Vec<Row> = resp
        .subjects
        .iter()
        .map(|s| {
            let (health, details) = summarize(s);
            Row {
                status: health.label(color),
                subject: s.subject.clone(),
                description: s.description.clone(),
                host: if s.host.is_empty() { "-".into() } else { s.host.clone() },
                last_seen: s.last_seen.map(rfc3339).unwrap_or_else(|| "-".into()),
                details,
            }
        })
        .collect();
    let alerting = resp.subjects.iter().filter(|s| s.alert_active).count();

    let mut table = Table::new(rows);
    table.with(Style::blank());

    out.push('\n');
    out.push_str(&table.to_string());
    out.push_str(&format!(
        "\n\n{alerting} alert(s) firing across {} subject(s)\n",
        resp.subjects.len()
    ));
    out
}

fn should_color() -> bool {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
    let dumb = std::env::var("TERM").is_ok_and(|t| t == "dumb");
    !no_color && !dumb && std::io::stdout().is_terminal()
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

async fn fetch_status(url: &str, timeout: Duration) -> Result<StatusResponse> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("build HTTP client")?;
    let res = client.get(url).send().await.context("request status")?;

    let status = res.status();
    if status != reqwest::StatusCode::OK {
        let body = res.text().await.unwrap_or_default();
        bail!("unexpected status {status}: {}", truncate(body.trim(), BODY_PREVIEW));
    }

    res.json::<StatusResponse>().await.context("decode response")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resp = fetch_status(&args.url, args.timeout)
        .await
        .context("fetch status")?;
    print!("{}", render(&resp, should_color()));
    Ok(())
}
