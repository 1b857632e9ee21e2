//! Polymarket Gamma API client.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::bets::{Bet, BetCreate};
use crate::clock::Clock;
use crate::retry::RetryPolicy;
use crate::sources::normalize::normalize_close_time;
use crate::sources::{MarketSource, SourceError};

pub const SOURCE_NAME: &str = "polymarket";
pub const GAMMA_BASE: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_USER_AGENT: &str = "market-sync/1.0";

/// Largest page the API serves.
const MAX_PAGE_SIZE: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CURSOR_KEYS: &[&str] = &["nextCursor", "next_cursor", "next", "cursor"];

/// Market object as returned by `/markets`. Only the fields we map.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolymarketMarket {
    #[serde(default)]
    id: Value,
    question: Option<String>,
    title: Option<String>,
    description: Option<String>,
    criteria: Option<String>,
    rules: Option<String>,
    slug: Option<String>,
    #[serde(default)]
    close_time: Value,
    #[serde(default)]
    end_date: Value,
    #[serde(default, rename = "end_time")]
    end_time: Value,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn first_present<'a>(values: [&'a Value; 3]) -> &'a Value {
    values
        .into_iter()
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .unwrap_or(&Value::Null)
}

impl PolymarketMarket {
    fn market_id(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_bet(self) -> Option<Bet> {
        let market_id = self.market_id()?;
        let title = non_empty(&self.question)
            .or(non_empty(&self.title))
            .unwrap_or_default()
            .to_string();
        let description = non_empty(&self.description)
            .or(non_empty(&self.criteria))
            .or(non_empty(&self.rules))
            .map(str::to_string);
        let slug = self.slug.filter(|s| !s.is_empty());
        let url = slug
            .as_ref()
            .map(|s| format!("https://polymarket.com/market/{s}"));
        let close_time =
            normalize_close_time(first_present([&self.close_time, &self.end_date, &self.end_time]));

        Some(Bet::from(BetCreate {
            source: SOURCE_NAME.to_string(),
            market_id,
            slug,
            title,
            description,
            url,
            close_time,
        }))
    }
}

/// Market objects of one page. The API has served both a bare array and
/// `{"data": [...]}`.
fn extract_items(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => Some(items),
            Some(Value::Object(inner)) => inner.get("data").and_then(Value::as_array),
            _ => None,
        },
        _ => None,
    }
}

fn next_cursor(payload: &Value) -> Option<String> {
    let map = payload.as_object()?;
    CURSOR_KEYS.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_bets(items: Vec<Value>) -> Vec<Bet> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<PolymarketMarket>(item) {
            Ok(market) => {
                let bet = market.into_bet();
                if bet.is_none() {
                    log::warn!("Skipping polymarket market without id");
                }
                bet
            }
            Err(e) => {
                log::warn!("Skipping malformed polymarket market: {e}");
                None
            }
        })
        .collect()
}

pub struct PolymarketSource {
    client: reqwest::blocking::Client,
    base_url: String,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl PolymarketSource {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            clock,
        })
    }

    fn get_page(&self, page_size: usize, cursor: Option<&str>) -> Result<Value, SourceError> {
        let url = format!("{}/markets", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("limit", page_size.to_string()),
            ("state", "open".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let result = self.retry.run_while(
            self.clock.as_ref(),
            "GET /markets",
            |_| {
                let response = self.client.get(&url).query(&query).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(SourceError::Server {
                        status: status.as_u16(),
                        body: response.text().unwrap_or_default(),
                    });
                }
                let bytes = response.bytes()?;
                Ok(serde_json::from_slice::<Value>(&bytes)?)
            },
            SourceError::is_transient,
        );

        result.map_err(|exhausted| {
            if exhausted.attempts > 1 {
                SourceError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    source: Box::new(exhausted.last_error),
                }
            } else {
                exhausted.last_error
            }
        })
    }

    /// Raw market objects, following the cursor until `limit` is reached or
    /// the API stops returning a cursor.
    fn fetch_open_markets(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        let mut results: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;

        while results.len() < limit {
            let page_size = (limit - results.len()).clamp(1, MAX_PAGE_SIZE);
            let payload = self.get_page(page_size, cursor.as_deref())?;

            let Some(items) = extract_items(&payload) else {
                log::warn!("Unexpected /markets payload shape; stopping pagination");
                break;
            };
            let page_len = items.len();
            results.extend(items.iter().cloned());
            log::debug!("Fetched page of {page_len} markets ({} total)", results.len());

            match next_cursor(&payload) {
                Some(next) if page_len > 0 => cursor = Some(next),
                _ => break,
            }
        }

        results.truncate(limit);
        Ok(results)
    }
}

impl MarketSource for PolymarketSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn fetch(&self, limit: usize) -> Result<Vec<Bet>, SourceError> {
        log::info!("Fetching up to {limit} open markets from {}", self.base_url);
        let items = self.fetch_open_markets(limit)?;
        let bets = parse_bets(items);
        log::info!("Fetched {} polymarket bets", bets.len());
        Ok(bets)
    }
}
