use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;

/// A single item off the Home Connect event stream, already split into its
/// SSE `event:` type and raw `data:` payload. Parsing the payload into
/// appliance updates is the Appliance Engine's job, not the transport's.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub event_type: String,
    pub ha_id: String,
    pub data: String,
}

/// Reconnect backoff, named as an explicit state rather than left as ad hoc
/// sleep calls scattered through the read loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopState {
    Connecting,
    Streaming,
    Backoff { kind: BackoffKind, delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    RateLimited,
    Transient,
}

impl BackoffKind {
    fn bounds(&self) -> (Duration, Duration) {
        match self {
            BackoffKind::RateLimited => (Duration::from_secs(60), Duration::from_secs(3600)),
            BackoffKind::Transient => (Duration::from_secs(1), Duration::from_secs(120)),
        }
    }

    fn initial(&self) -> Duration {
        self.bounds().0
    }

    fn clamp(&self, delay: Duration) -> Duration {
        let (min, max) = self.bounds();
        delay.clamp(min, max)
    }

    fn doubled_from(&self, previous: Duration) -> Duration {
        self.clamp(previous.saturating_mul(2))
    }
}

/// Drives the SSE read loop against `endpoint`, handing each parsed event to
/// `on_event`, until `shutdown` fires. Reconnects forever on failure,
/// doubling the relevant backoff each consecutive time it fires and
/// resetting to its floor the moment an event is successfully parsed. A
/// clean stream timeout (Home Connect closes idle connections roughly
/// hourly) reconnects immediately without growing the backoff at all.
pub async fn run_event_loop<F, H>(
    client: &Client,
    auth: &Arc<dyn AuthProvider>,
    host: &str,
    endpoint: &str,
    mut on_event: F,
    mut on_connection: H,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) where
    F: FnMut(StreamEvent) + Send,
    H: FnMut(bool) + Send,
{
    let mut state = LoopState::Connecting;
    let mut last_backoff = Duration::ZERO;

    loop {
        match state {
            LoopState::Connecting => {
                let token = match auth.access_token().await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "failed to obtain access token for SSE stream, backing off");
                        on_connection(false);
                        let delay = BackoffKind::Transient.doubled_from(last_backoff.max(Duration::from_millis(500)));
                        last_backoff = delay;
                        state = LoopState::Backoff { kind: BackoffKind::Transient, delay };
                        continue;
                    }
                };

                let url = format!("{host}{endpoint}");
                let request = client
                    .get(&url)
                    .header("Authorization", format!("Bearer {token}"))
                    .header("Accept", "text/event-stream")
                    .header("Accept-Language", "en-GB");

                let mut stream = match EventSource::new(request) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to open SSE request");
                        on_connection(false);
                        let delay = BackoffKind::Transient.doubled_from(last_backoff.max(Duration::from_millis(500)));
                        last_backoff = delay;
                        state = LoopState::Backoff { kind: BackoffKind::Transient, delay };
                        continue;
                    }
                };

                let mut failure: std::option::Option<BackoffKind> = None;
                let mut current_ha_id = String::new();

                'stream: loop {
                    tokio::select! {
                        _ = &mut shutdown => return,
                        next = stream.next() => {
                            match next {
                                Some(Ok(Event::Open)) => {
                                    debug!(endpoint, "SSE connection open");
                                    on_connection(true);
                                    state = LoopState::Streaming;
                                }
                                Some(Ok(Event::Message(msg))) => {
                                    if !msg.id.is_empty() {
                                        current_ha_id = msg.id.clone();
                                    }
                                    on_event(StreamEvent {
                                        event_type: msg.event,
                                        ha_id: current_ha_id.clone(),
                                        data: msg.data,
                                    });
                                    last_backoff = Duration::ZERO;
                                }
                                Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                                    info!(endpoint, "SSE stream ended (idle timeout), reconnecting");
                                    on_connection(false);
                                    break 'stream;
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, endpoint, "SSE stream error, will reconnect");
                                    on_connection(false);
                                    failure = Some(classify_error(&e));
                                    break 'stream;
                                }
                                None => {
                                    on_connection(false);
                                    break 'stream;
                                }
                            }
                        }
                    }
                }

                stream.close();

                state = match failure {
                    Some(kind) => {
                        let delay = kind.doubled_from(last_backoff.max(kind.initial() / 2));
                        last_backoff = delay;
                        LoopState::Backoff { kind, delay }
                    }
                    None => LoopState::Connecting,
                };
            }
            LoopState::Streaming => {
                // Control never parks here: the read loop above drives Streaming
                // inline and always leaves via Connecting or Backoff. This arm
                // exists so LoopState is a complete, inspectable description of
                // the reconnect machine for callers and tests.
                state = LoopState::Connecting;
            }
            LoopState::Backoff { kind, delay } => {
                debug!(?kind, delay_secs = delay.as_secs(), "sleeping before SSE reconnect");
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                state = LoopState::Connecting;
            }
        }
    }
}

fn classify_error(err: &reqwest_eventsource::Error) -> BackoffKind {
    if let reqwest_eventsource::Error::InvalidStatusCode(status, _) = err {
        if status.as_u16() == 429 {
            return BackoffKind::RateLimited;
        }
    }
    BackoffKind::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_backoff_is_clamped_to_120s() {
        let huge = Duration::from_secs(10_000);
        assert_eq!(BackoffKind::Transient.clamp(huge), Duration::from_secs(120));
    }

    #[test]
    fn rate_limited_backoff_floors_at_60s() {
        let tiny = Duration::from_secs(1);
        assert_eq!(BackoffKind::RateLimited.clamp(tiny), Duration::from_secs(60));
    }

    #[test]
    fn doubled_from_doubles_within_bounds() {
        let next = BackoffKind::Transient.doubled_from(Duration::from_secs(10));
        assert_eq!(next, Duration::from_secs(20));
    }
}
