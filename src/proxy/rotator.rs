//! Proxy pool with rotation policies.
//!
//! The pool is populated during setup (programmatically or from a proxy
//! list file) and read by selection operations while sessions run. All
//! state lives behind one async mutex so `unused()`'s read-then-insert is
//! atomic with respect to concurrent session launches.

use std::collections::HashSet;
use std::path::Path;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::proxy::ProxyDescriptor;

#[derive(Default)]
struct PoolState {
    pool: Vec<ProxyDescriptor>,
    /// Round-robin position for `next()`.
    cursor: usize,
    /// Servers handed out by `unused()` this run; cleared on exhaustion.
    used: HashSet<String>,
}

/// Ordered pool of egress proxies with round-robin, random, unused-first
/// and by-country selection.
#[derive(Default)]
pub struct ProxyRotator {
    state: Mutex<PoolState>,
}

impl ProxyRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one proxy. Duplicates are permitted; deduplication is the
    /// caller's concern.
    pub async fn add(&self, proxy: ProxyDescriptor) {
        self.state.lock().await.pool.push(proxy);
    }

    /// Append a batch of proxies.
    pub async fn add_all(&self, proxies: impl IntoIterator<Item = ProxyDescriptor>) {
        self.state.lock().await.pool.extend(proxies);
    }

    /// Round-robin selection. Returns `None` on an empty pool. Does not
    /// touch the `used` set.
    pub async fn next(&self) -> Option<ProxyDescriptor> {
        let mut state = self.state.lock().await;
        if state.pool.is_empty() {
            return None;
        }
        let idx = state.cursor % state.pool.len();
        state.cursor = (idx + 1) % state.pool.len();
        Some(state.pool[idx].clone())
    }

    /// Uniform random selection. `None` on an empty pool.
    pub async fn random(&self) -> Option<ProxyDescriptor> {
        let state = self.state.lock().await;
        state.pool.choose(&mut rand::thread_rng()).cloned()
    }

    /// Draw uniformly from the proxies not yet handed out this run and
    /// mark the winner used. Once every proxy has been tried, the used set
    /// is cleared and a random proxy is returned without marking it, so a
    /// fresh pass over the whole pool starts on the next call.
    pub async fn unused(&self) -> Option<ProxyDescriptor> {
        let mut state = self.state.lock().await;
        if state.pool.is_empty() {
            return None;
        }
        let PoolState { pool, used, .. } = &mut *state;

        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, p)| !used.contains(&p.server))
            .map(|(i, _)| i)
            .collect();

        match candidates.choose(&mut rand::thread_rng()) {
            Some(&idx) => {
                let chosen = pool[idx].clone();
                used.insert(chosen.server.clone());
                Some(chosen)
            }
            None => {
                debug!("proxy pool exhausted, clearing used set");
                used.clear();
                pool.choose(&mut rand::thread_rng()).cloned()
            }
        }
    }

    /// Uniform draw among proxies tagged with the given country code,
    /// case-insensitively. `None` when nothing matches.
    pub async fn by_country(&self, code: &str) -> Option<ProxyDescriptor> {
        let state = self.state.lock().await;
        let matches: Vec<&ProxyDescriptor> = state
            .pool
            .iter()
            .filter(|p| {
                p.country
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(code))
            })
            .collect();
        matches.choose(&mut rand::thread_rng()).map(|p| (*p).clone())
    }

    /// Load proxies from a newline-delimited file, appending every line
    /// that parses. Blank lines and `#` comments are ignored; unparseable
    /// lines are skipped and only summarized, so a partially bad file never
    /// aborts startup.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;

        let mut loaded = 0usize;
        let mut skipped = 0usize;
        let mut parsed = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match ProxyDescriptor::parse_line(trimmed) {
                Some(proxy) => {
                    parsed.push(proxy);
                    loaded += 1;
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, "skipped unparseable proxy lines");
        }
        debug!(loaded, path = %path.as_ref().display(), "loaded proxy list");

        self.add_all(parsed).await;
        Ok(loaded)
    }

    /// Serialize the pool back to the line grammar, embedding credentials
    /// in the URI form when present.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state.lock().await;
        let mut out = String::new();
        for proxy in &state.pool {
            out.push_str(&proxy.to_line());
            out.push('\n');
        }
        drop(state);
        tokio::fs::write(path.as_ref(), out).await?;
        Ok(())
    }

    /// Number of proxies in the pool.
    pub async fn count(&self) -> usize {
        self.state.lock().await.pool.len()
    }

    /// Whether the pool holds at least one proxy.
    pub async fn has_proxies(&self) -> bool {
        !self.state.lock().await.pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyScheme;

    fn proxy(n: u16) -> ProxyDescriptor {
        ProxyDescriptor::new(format!("http://10.0.0.{n}:8080"), ProxyScheme::Http)
    }

    #[tokio::test]
    async fn test_next_round_robin_order_and_wrap() {
        let rotator = ProxyRotator::new();
        rotator.add_all((1..=3).map(proxy)).await;

        let first_pass: Vec<String> = [
            rotator.next().await.unwrap().server,
            rotator.next().await.unwrap().server,
            rotator.next().await.unwrap().server,
        ]
        .into();
        assert_eq!(
            first_pass,
            vec![
                "http://10.0.0.1:8080",
                "http://10.0.0.2:8080",
                "http://10.0.0.3:8080"
            ]
        );

        // Fourth call wraps to the first entry again.
        assert_eq!(rotator.next().await.unwrap().server, "http://10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_empty_pool_selections_return_none() {
        let rotator = ProxyRotator::new();
        assert!(rotator.next().await.is_none());
        assert!(rotator.random().await.is_none());
        assert!(rotator.unused().await.is_none());
        assert!(rotator.by_country("us").await.is_none());
        assert!(!rotator.has_proxies().await);
    }

    #[tokio::test]
    async fn test_unused_exhaustion_resets() {
        let rotator = ProxyRotator::new();
        rotator.add_all((1..=4).map(proxy)).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let p = rotator.unused().await.unwrap();
            seen.insert(p.server);
        }
        // Four draws cover four distinct proxies.
        assert_eq!(seen.len(), 4);

        // Fifth draw must not fail: the used set resets on exhaustion.
        let again = rotator.unused().await.unwrap();
        assert!(seen.contains(&again.server));
    }

    #[tokio::test]
    async fn test_reset_draw_starts_a_fresh_full_pass() {
        let rotator = ProxyRotator::new();
        rotator.add_all((1..=3).map(proxy)).await;

        for _ in 0..3 {
            rotator.unused().await.unwrap();
        }
        // The reset draw itself is not marked used, so the next full pass
        // still covers every proxy.
        rotator.unused().await.unwrap();
        let mut pass = std::collections::HashSet::new();
        for _ in 0..3 {
            pass.insert(rotator.unused().await.unwrap().server);
        }
        assert_eq!(pass.len(), 3);
    }

    #[tokio::test]
    async fn test_by_country_is_case_insensitive() {
        let rotator = ProxyRotator::new();
        let mut us = proxy(1);
        us.country = Some("US".to_string());
        let mut de = proxy(2);
        de.country = Some("de".to_string());
        rotator.add_all([us, de]).await;

        assert_eq!(
            rotator.by_country("us").await.unwrap().server,
            "http://10.0.0.1:8080"
        );
        assert_eq!(
            rotator.by_country("DE").await.unwrap().server,
            "http://10.0.0.2:8080"
        );
        assert!(rotator.by_country("fr").await.is_none());
    }

    #[tokio::test]
    async fn test_load_from_file_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        tokio::fs::write(&path, "1.1.1.1:80\n#comment\n\nbad-line\nsocks5://2.2.2.2:1080\n")
            .await
            .unwrap();

        let rotator = ProxyRotator::new();
        let loaded = rotator.load_from_file(&path).await.unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(rotator.count().await, 2);

        let first = rotator.next().await.unwrap();
        assert_eq!(first.server, "http://1.1.1.1:80");
        let second = rotator.next().await.unwrap();
        assert_eq!(second.server, "socks5://2.2.2.2:1080");
        assert_eq!(second.scheme, ProxyScheme::Socks5);
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let rotator = ProxyRotator::new();
        let mut with_creds = proxy(1);
        with_creds.username = Some("user".to_string());
        with_creds.password = Some("pass".to_string());
        // A scheme-default port must survive the save/load cycle too.
        let default_port = ProxyDescriptor::parse_line("1.1.1.1:80").unwrap();
        rotator.add_all([with_creds, proxy(2), default_port]).await;
        rotator.save_to_file(&path).await.unwrap();

        let reloaded = ProxyRotator::new();
        assert_eq!(reloaded.load_from_file(&path).await.unwrap(), 3);
        let first = reloaded.next().await.unwrap();
        assert_eq!(first.server, "http://10.0.0.1:8080");
        assert_eq!(first.username.as_deref(), Some("user"));
        assert_eq!(first.password.as_deref(), Some("pass"));
        reloaded.next().await.unwrap();
        assert_eq!(reloaded.next().await.unwrap().server, "http://1.1.1.1:80");
    }
}
