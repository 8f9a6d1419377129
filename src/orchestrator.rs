//! Concurrent driver for one server and a group of clients.
//!
//! Everything runs on a single thread inside a `tokio::task::LocalSet`:
//! - the server loop accepts forever and spawns one task per connection
//! - the client group runs every schedule concurrently and completes only
//!   when all of them have finished, successfully or not
//! - the two are raced; whichever finishes first cancels the other, which in
//!   practice means the client group finishing tears the server loop down
//!
//! Server sessions are fire-and-forget. Stopping the server loop does not
//! abort them; they live until the `LocalSet` is dropped at the end of
//! [`Orchestrator::run`].

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::panic;
use std::time::Duration;
use tokio::task::{JoinSet, LocalSet};
use tracing::{debug, error, info, warn};

use crate::protocol::Answer;
use crate::session::{run_client, serve_connection, ClientSchedule, SessionError};
use crate::transport::{Listener, Transport};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Output of [`race`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

/// Run two futures concurrently and return the first to finish.
///
/// The other future is dropped, which cancels it at its current suspension
/// point.
pub async fn race<A, B>(left: A, right: B) -> Either<A::Output, B::Output>
where
    A: Future,
    B: Future,
{
    tokio::select! {
        out = left => Either::Left(out),
        out = right => Either::Right(out),
    }
}

/// Run every future as a local task and wait for all of them.
///
/// Outputs are returned in input order. Must be polled inside a `LocalSet`.
/// A panicking member is re-raised once the rest have finished.
pub async fn join_all<I, F>(futures: I) -> Vec<F::Output>
where
    I: IntoIterator<Item = F>,
    F: Future + 'static,
    F::Output: 'static,
{
    let mut set = JoinSet::new();
    let mut count = 0usize;
    for (index, future) in futures.into_iter().enumerate() {
        set.spawn_local(async move { (index, future.await) });
        count += 1;
    }

    let mut outputs: Vec<Option<F::Output>> = (0..count).map(|_| None).collect();
    let mut panicked = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, output)) => outputs[index] = Some(output),
            Err(e) if e.is_panic() => panicked = Some(e.into_panic()),
            Err(e) => debug!(error = %e, "Task cancelled"),
        }
    }
    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }

    outputs.into_iter().flatten().collect()
}

/// Accept connections forever, serving each one on its own local task.
///
/// Must be polled inside a `LocalSet`.
pub async fn server_loop<L: Listener>(mut listener: L, max_frame_size: usize) -> Infallible {
    let mut next_id: u64 = 0;

    loop {
        match listener.accept().await {
            Ok(stream) => {
                let id = next_id;
                next_id += 1;
                debug!(connection = id, "Accepted connection");

                tokio::task::spawn_local(async move {
                    match serve_connection(stream, max_frame_size).await {
                        Ok(answer) => {
                            info!(connection = id, value = answer.value, "Sent answer")
                        }
                        Err(SessionError::Parse(e)) => warn!(
                            connection = id,
                            error = %e,
                            category = ?e.kind(),
                            "Session rejected input"
                        ),
                        Err(e) => warn!(connection = id, error = %e, "Session failed"),
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Result of one client session.
#[derive(Debug)]
pub struct ClientOutcome {
    pub id: u32,
    pub result: Result<Answer, SessionError>,
}

/// Per-client results, in schedule order.
#[derive(Debug)]
pub struct RunReport {
    pub clients: Vec<ClientOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.clients.iter().filter(|c| c.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.clients.len() - self.succeeded()
    }
}

/// One server plus a group of clients over the same transport.
pub struct Orchestrator<T> {
    transport: T,
    schedules: Vec<ClientSchedule>,
    max_frame_size: usize,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, schedules: Vec<ClientSchedule>, max_frame_size: usize) -> Self {
        Self {
            transport,
            schedules,
            max_frame_size,
        }
    }

    /// Bind, then race the server loop against the client group.
    ///
    /// Only a failure to bind is returned as an error; session failures are
    /// reported per client in the [`RunReport`].
    pub async fn run(self) -> io::Result<RunReport> {
        let Orchestrator {
            transport,
            schedules,
            max_frame_size,
        } = self;

        let local = LocalSet::new();
        local
            .run_until(async move {
                let listener = transport.bind().await?;
                info!(clients = schedules.len(), "Server listening");

                let clients = schedules.into_iter().map(|schedule| {
                    let transport = transport.clone();
                    async move {
                        let result = run_client(&transport, &schedule, max_frame_size).await;
                        if let Err(e) = &result {
                            warn!(client = schedule.id, error = %e, "Client failed");
                        }
                        ClientOutcome {
                            id: schedule.id,
                            result,
                        }
                    }
                });

                match race(server_loop(listener, max_frame_size), join_all(clients)).await {
                    Either::Left(never) => match never {},
                    Either::Right(clients) => {
                        debug!("Client group finished, stopping server");
                        Ok(RunReport { clients })
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FrameError, FramedChannel, DEFAULT_MAX_FRAME_SIZE};
    use crate::protocol::Command;
    use crate::transport::{MemoryTransport, UnixTransport};
    use tokio::time::{sleep, Instant};

    fn schedule(id: u32, delay_ms: u64, lines: &[&str]) -> ClientSchedule {
        let commands = lines.iter().map(|l| l.parse().unwrap()).collect();
        ClientSchedule::new(id, Duration::from_millis(delay_ms), commands)
    }

    fn reference_schedules() -> Vec<ClientSchedule> {
        vec![
            schedule(1, 3000, &["init 12", "add -2", "mul 8", "div 10"]),
            schedule(2, 500, &["init -5", "add 3", "mul 7", "add -1", "div 5"]),
            schedule(3, 2000, &["init 0", "add 2", "mul -4", "add 9"]),
        ]
    }

    fn answers(report: &RunReport) -> Vec<(u32, i32)> {
        report
            .clients
            .iter()
            .map(|c| (c.id, c.result.as_ref().unwrap().value))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_configuration() {
        let orchestrator = Orchestrator::new(
            MemoryTransport::default(),
            reference_schedules(),
            DEFAULT_MAX_FRAME_SIZE,
        );
        let report = orchestrator.run().await.unwrap();

        assert_eq!(answers(&report), vec![(1, 8), (2, -3), (3, 1)]);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_clients_get_their_own_answers() {
        let schedules: Vec<ClientSchedule> = (0..32)
            .map(|i| {
                let i = i as i32;
                let commands = vec![
                    Command::Init(i),
                    Command::Mul(i - 7),
                    Command::Add(3 * i),
                    Command::div(i % 5 + 1).unwrap(),
                ];
                let delay = Duration::from_millis(10 + (i as u64 % 4) * 7);
                ClientSchedule::new(i as u32, delay, commands)
            })
            .collect();
        let expected: Vec<(u32, i32)> = schedules
            .iter()
            .map(|s| (s.id, s.expected_answer().value))
            .collect();

        let orchestrator = Orchestrator::new(MemoryTransport::default(), schedules, 64);
        let report = orchestrator.run().await.unwrap();
        assert_eq!(answers(&report), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_connections_are_isolated() {
        let transport = MemoryTransport::default();

        // Queued before the listener is bound; accepted first.
        let mut bad = FramedChannel::new(transport.connect().await.unwrap());
        bad.send("init 1").await.unwrap();
        bad.send("div 0").await.unwrap();
        let mut silent = FramedChannel::new(transport.connect().await.unwrap());
        silent.send("init 5").await.unwrap();

        let start = Instant::now();
        let watch_bad = async {
            let closed = bad.receive_one().await;
            (closed, start.elapsed())
        };

        let orchestrator = Orchestrator::new(transport, reference_schedules(), 64);
        let (report, (closed, closed_at)) = tokio::join!(orchestrator.run(), watch_bad);
        assert_eq!(answers(&report.unwrap()), vec![(1, 8), (2, -3), (3, 1)]);

        // Closed without an answer, long before the first client tick.
        assert!(matches!(closed, Err(FrameError::ConnectionClosed)));
        assert!(closed_at < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let transport = MemoryTransport::default();
        let _taken = transport.bind().await.unwrap();

        let orchestrator = Orchestrator::new(transport, reference_schedules(), 64);
        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_client_group_finishes_immediately() {
        let orchestrator = Orchestrator::new(MemoryTransport::default(), Vec::new(), 64);
        let report = orchestrator.run().await.unwrap();
        assert!(report.clients.is_empty());
    }

    #[tokio::test]
    async fn test_unix_socket_end_to_end() {
        let path = std::env::temp_dir().join(format!(
            "compute-session-e2e-{}.sock",
            std::process::id()
        ));
        let schedules = vec![
            schedule(1, 5, &["init 12", "add -2", "mul 8", "div 10"]),
            schedule(2, 1, &["init -5", "add 3", "mul 7", "add -1", "div 5"]),
            schedule(3, 3, &["init 0", "add 2", "mul -4", "add 9"]),
        ];

        let orchestrator = Orchestrator::new(UnixTransport::new(&path), schedules, 256);
        let report = orchestrator.run().await.unwrap();
        assert_eq!(answers(&report), vec![(1, 8), (2, -3), (3, 1)]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_returns_first_finisher() {
        let fast = async {
            sleep(Duration::from_millis(10)).await;
            "fast"
        };
        let slow = async {
            sleep(Duration::from_secs(10)).await;
            7
        };
        assert_eq!(race(slow, fast).await, Either::Right("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_cancels_loser() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let loser = async move {
            sleep(Duration::from_secs(1)).await;
            tx.send(()).unwrap();
        };
        let winner = sleep(Duration::from_millis(1));

        assert!(matches!(race(loser, winner).await, Either::Right(())));
        // Dropping the loser dropped its sender without sending.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_all_waits_for_every_member() {
        LocalSet::new()
            .run_until(async {
                let start = tokio::time::Instant::now();
                let futures = [30u64, 10, 20].map(|ms| async move {
                    sleep(Duration::from_millis(ms)).await;
                    ms
                });
                let outputs = join_all(futures).await;
                assert_eq!(outputs, vec![30, 10, 20]);
                assert_eq!(start.elapsed(), Duration::from_millis(30));
            })
            .await;
    }

    #[tokio::test]
    async fn test_join_all_collects_failures() {
        LocalSet::new()
            .run_until(async {
                let futures = [1, 0, 3].map(|n| async move {
                    if n == 0 {
                        Err("zero")
                    } else {
                        Ok(n)
                    }
                });
                let outputs = join_all(futures).await;
                assert_eq!(outputs, vec![Ok(1), Err("zero"), Ok(3)]);
            })
            .await;
    }
}
