// Polls the ESPN scoreboard from a background task and hands readings to the
// app loop over a channel.
use crate::{
    Result,
    app::score_source::{
        ScoreReading,
        ScoreSource,
    },
    grid::GameId,
    score::{
        GameState,
        Score,
        normalize_scoreboard,
    },
};
use anyhow::{
    Context,
    anyhow,
};
use serde_json::Value;
use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// While a quarter is in progress.
    pub live: Duration,
    pub idle: Duration,
}

impl PollIntervals {
    fn after(&self, score: Option<&Score>) -> Duration {
        match score.map(|s| s.game_state) {
            Some(GameState::In) => self.live,
            _ => self.idle,
        }
    }
}

pub struct EspnScoreSource {
    receiver: mpsc::Receiver<ScoreReading>,
    task: JoinHandle<()>,
}

impl EspnScoreSource {
    pub fn new(
        game_id: GameId,
        event_id: String,
        scoreboard_url: Url,
        timeout: Duration,
        intervals: PollIntervals,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build score provider client")?;
        let (sender, receiver) = mpsc::channel(4);
        tracing::info!(
            "polling {scoreboard_url} for event {event_id} every {:?} live, {:?} otherwise",
            intervals.live,
            intervals.idle
        );
        let task = tokio::spawn(async move {
            loop {
                let score = fetch_score(&client, &scoreboard_url, &event_id).await;
                let wait = intervals.after(score.as_ref());
                if sender.send(ScoreReading { game_id, score }).await.is_err() {
                    return;
                }
                tokio::time::sleep(wait).await;
            }
        });
        Ok(Self { receiver, task })
    }
}

impl ScoreSource for EspnScoreSource {
    async fn next_score(&mut self) -> Result<ScoreReading> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("score polling task stopped"))
    }
}

impl Drop for EspnScoreSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fetch and normalize one scoreboard. Every failure degrades to `None`.
pub async fn fetch_score(
    client: &reqwest::Client,
    scoreboard_url: &Url,
    event_id: &str,
) -> Option<Score> {
    let response = match client
        .get(scoreboard_url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("score provider request failed: {e}");
            return None;
        }
    };
    let payload: Value = match response.json().await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("score provider returned unreadable payload: {e}");
            return None;
        }
    };
    let score = normalize_scoreboard(&payload, event_id);
    if score.is_none() {
        tracing::warn!("scoreboard has no usable entry for event {event_id}");
    }
    score
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        EVENT_ID,
        scoreboard,
    };
    use actix_web::{
        App,
        HttpResponse,
        HttpServer,
        dev::ServerHandle,
        web,
    };
    use std::net::TcpListener;

    struct Fixture {
        url: Url,
        handle: ServerHandle,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.handle.stop(false);
        }
    }

    fn fixture_server(payload: Value, delay: Duration) -> Fixture {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let url = format!("http://{}/scoreboard", listener.local_addr().unwrap());
        let server = HttpServer::new(move || {
            let payload = payload.clone();
            App::new().route(
                "/scoreboard",
                web::get().to(move || {
                    let payload = payload.clone();
                    async move {
                        actix_web::rt::time::sleep(delay).await;
                        HttpResponse::Ok().json(payload)
                    }
                }),
            )
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });
        Fixture {
            url: Url::parse(&url).unwrap(),
            handle,
        }
    }

    fn client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder().timeout(timeout).build().unwrap()
    }

    fn live_payload() -> Value {
        scoreboard("in", 2, ("7", &[7.0]), ("3", &[3.0]))
    }

    #[tokio::test]
    async fn fetch_score__live_scoreboard__is_normalized() {
        // given
        let fixture = fixture_server(live_payload(), Duration::ZERO);

        // when
        let score = fetch_score(&client(Duration::from_secs(5)), &fixture.url, EVENT_ID).await;

        // then
        let score = score.unwrap();
        assert_eq!(score.game_state, GameState::In);
        assert_eq!((score.home_score, score.away_score), (7, 3));
        assert_eq!(score.quarter_scores.len(), 1);
    }

    #[tokio::test]
    async fn fetch_score__slow_provider__degrades_to_unavailable() {
        // given
        let fixture = fixture_server(live_payload(), Duration::from_secs(3));

        // when
        let score =
            fetch_score(&client(Duration::from_millis(200)), &fixture.url, EVENT_ID).await;

        // then
        assert!(score.is_none());
    }

    #[tokio::test]
    async fn fetch_score__unreachable_provider__degrades_to_unavailable() {
        // given
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/scoreboard")).unwrap();

        // when
        let score = fetch_score(&client(Duration::from_secs(1)), &url, EVENT_ID).await;

        // then
        assert!(score.is_none());
    }

    #[tokio::test]
    async fn fetch_score__unknown_event__degrades_to_unavailable() {
        let fixture = fixture_server(live_payload(), Duration::ZERO);
        let score = fetch_score(&client(Duration::from_secs(5)), &fixture.url, "404").await;
        assert!(score.is_none());
    }

    #[tokio::test]
    async fn next_score__background_poll__delivers_readings_for_the_game() {
        // given
        let fixture = fixture_server(live_payload(), Duration::ZERO);
        let mut source = EspnScoreSource::new(
            GameId(1),
            EVENT_ID.to_string(),
            fixture.url.clone(),
            Duration::from_secs(5),
            PollIntervals {
                live: Duration::from_millis(10),
                idle: Duration::from_secs(60),
            },
        )
        .unwrap();

        // when
        let first = source.next_score().await.unwrap();
        let second = source.next_score().await.unwrap();

        // then
        assert_eq!(first.game_id, GameId(1));
        assert!(first.score.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn poll_intervals__live_game__polls_faster() {
        let intervals = PollIntervals {
            live: Duration::from_secs(30),
            idle: Duration::from_secs(300),
        };
        let live = normalize_scoreboard(&live_payload(), EVENT_ID);
        let final_payload = scoreboard("post", 4, ("7", &[]), ("3", &[]));
        let done = normalize_scoreboard(&final_payload, EVENT_ID);
        assert_eq!(intervals.after(live.as_ref()), Duration::from_secs(30));
        assert_eq!(intervals.after(done.as_ref()), Duration::from_secs(300));
        assert_eq!(intervals.after(None), Duration::from_secs(300));
    }
}
