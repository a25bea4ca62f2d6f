use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde_json::Value;

use crate::http::{ApiClient, HttpMethod, RequestConfig};

/// Splits `Name: value`.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header {:?}, expected NAME:VALUE", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header {:?}, the name is empty", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Splits `key=value`.
pub fn parse_query(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid query parameter {:?}, expected KEY=VALUE", raw))?;
    if key.is_empty() {
        bail!("Invalid query parameter {:?}, the key is empty", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Sends one request and returns the decoded JSON body.
#[tracing::instrument(skip(client, data, headers, query))]
pub async fn request(
    client: &ApiClient,
    method: HttpMethod,
    path: &str,
    data: Option<&str>,
    headers: &[String],
    query: &[String],
) -> Result<Value> {
    let payload = data
        .map(|d| serde_json::from_str::<Value>(d).context("--data must be valid JSON"))
        .transpose()?;

    let mut config = RequestConfig::new();
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        config = config.header(name, value);
    }
    for raw in query {
        let (key, value) = parse_query(raw)?;
        config = config.query(key, value);
    }

    debug!("{} {} with {} header(s)", method, path, config.headers.len());

    let body: Value = match method {
        HttpMethod::Get | HttpMethod::Delete if payload.is_some() => {
            bail!("--data cannot be used with {}", method)
        }
        HttpMethod::Get => client.get(path, Some(config)).await?,
        HttpMethod::Delete => client.delete(path, Some(config)).await?,
        HttpMethod::Post => client.post(path, payload.as_ref(), Some(config)).await?,
        HttpMethod::Put => client.put(path, payload.as_ref(), Some(config)).await?,
        HttpMethod::Patch => client.patch(path, payload.as_ref(), Some(config)).await?,
    };
    Ok(body)
}
