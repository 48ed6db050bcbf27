use std::io::IsTerminal;
use std::time::Duration;

use crate::types::NodeStatus;

use super::render::render_status;

/// Polling cadence that backs off while nobody is watching closely.
///
/// Each poll lengthens the interval by `increment` up to `max`. While hidden
/// the cadence drops to `hidden`, and becoming visible again restarts at
/// `starting`.
#[derive(Debug, Clone)]
pub struct SmartInterval {
    starting: Duration,
    max: Duration,
    hidden: Duration,
    increment: Duration,
    current: Duration,
}

impl SmartInterval {
    pub fn new(starting: Duration, max: Duration, hidden: Duration, increment: Duration) -> Self {
        Self {
            starting,
            max,
            hidden,
            increment,
            current: starting,
        }
    }

    /// Cadence used for node status polling.
    #[must_use]
    pub fn node_status() -> Self {
        Self::new(
            Duration::from_secs(30),
            Duration::from_secs(120),
            Duration::from_secs(240),
            Duration::from_secs(15),
        )
    }

    /// Delay before the next poll.
    pub fn next_delay(&mut self, hidden: bool) -> Duration {
        if hidden {
            self.current = self.starting;
            return self.hidden;
        }

        let delay = self.current;
        self.current = (self.current + self.increment).min(self.max);
        delay
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}

pub struct StatusClient {
    client: reqwest::Client,
    status_url: String,
}

impl StatusClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            status_url: format!("{}/api/v1/geo/status", base_url.trim_end_matches('/')),
        })
    }

    pub async fn fetch(&self) -> anyhow::Result<NodeStatus> {
        let resp = self.client.get(&self.status_url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body["error"]
                .as_str()
                .map_or_else(|| status.to_string(), str::to_string);
            anyhow::bail!("{message}");
        }
        Ok(resp.json().await?)
    }
}

/// Fetches and prints the status once, or forever on the smart interval.
pub async fn run_status(url: String, watch: bool) -> anyhow::Result<()> {
    let client = StatusClient::new(&url)?;

    if !watch {
        let status = client.fetch().await?;
        print!("{}", render_status(&status));
        return Ok(());
    }

    let mut interval = SmartInterval::node_status();
    loop {
        match client.fetch().await {
            Ok(status) => {
                println!("{}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
                print!("{}", render_status(&status));
                println!();
            }
            Err(e) => eprintln!("Failed to fetch status: {e}"),
        }

        let hidden = !std::io::stdout().is_terminal();
        tokio::time::sleep(interval.next_delay(hidden)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backs_off_to_max() {
        let mut interval = SmartInterval::node_status();
        let delays: Vec<u64> = (0..8).map(|_| interval.next_delay(false).as_secs()).collect();
        assert_eq!(delays, vec![30, 45, 60, 75, 90, 105, 120, 120]);
    }

    #[test]
    fn test_hidden_cadence_resets_on_return() {
        let mut interval = SmartInterval::node_status();
        interval.next_delay(false);
        interval.next_delay(false);
        assert_eq!(interval.current(), Duration::from_secs(60));

        assert_eq!(interval.next_delay(true), Duration::from_secs(240));
        assert_eq!(interval.next_delay(false), Duration::from_secs(30));
    }
}
