//! Client and server session handlers.
//!
//! A server session reads commands from one connection, feeds them to its own
//! [`Accumulator`] and writes the answer when `compute` arrives. A client
//! session plays a fixed schedule of commands at evenly spaced ticks, then
//! asks for the result and reads back one answer.

use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::accumulator::Accumulator;
use crate::framing::{FrameError, FramedChannel};
use crate::protocol::{Answer, Command, ParseError};
use crate::transport::Transport;

/// Why a session ended without completing its exchange
#[derive(Debug)]
pub enum SessionError {
    /// Could not open the connection
    Connect(io::Error),
    /// Framing or transport failure
    Frame(FrameError),
    /// Peer sent a malformed message
    Parse(ParseError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(e) => write!(f, "connect failed: {}", e),
            SessionError::Frame(e) => write!(f, "{}", e),
            SessionError::Parse(e) => write!(f, "invalid input: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Connect(e) => Some(e),
            SessionError::Frame(e) => Some(e),
            SessionError::Parse(e) => Some(e),
        }
    }
}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        SessionError::Frame(e)
    }
}

impl From<ParseError> for SessionError {
    fn from(e: ParseError) -> Self {
        SessionError::Parse(e)
    }
}

/// Commands a client sends, one per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSchedule {
    pub id: u32,
    /// Spacing between ticks; the first tick fires one delay after connect.
    pub delay: Duration,
    pub commands: Vec<Command>,
}

impl ClientSchedule {
    pub fn new(id: u32, delay: Duration, commands: Vec<Command>) -> Self {
        Self {
            id,
            delay,
            commands,
        }
    }

    /// Answer the server should send back for this schedule.
    pub fn expected_answer(&self) -> Answer {
        let mut acc = Accumulator::default();
        acc.replay(&self.commands);
        Answer::new(acc.value())
    }
}

/// Run one client session against `transport`.
pub async fn run_client<T: Transport>(
    transport: &T,
    schedule: &ClientSchedule,
    max_frame_size: usize,
) -> Result<Answer, SessionError> {
    let stream = transport.connect().await.map_err(SessionError::Connect)?;
    let mut channel = FramedChannel::with_max_frame_size(stream, max_frame_size);
    debug!(
        client = schedule.id,
        max_frame_size = channel.max_frame_size(),
        "Connected"
    );

    // Ticks are anchored to the schedule, not to when the last send finished.
    let mut deadline = Instant::now() + schedule.delay;
    for command in &schedule.commands {
        sleep_until(deadline).await;
        deadline += schedule.delay;

        channel.send_message(command).await?;
        info!(client = schedule.id, ?command, "Sent command");
    }

    channel.send_message(&Command::Query).await?;
    let answer: Answer = channel.receive_message().await?;
    info!(client = schedule.id, value = answer.value, "Got answer");

    Ok(answer)
}

/// Serve one accepted connection until it sends `compute`.
pub async fn serve_connection<S>(stream: S, max_frame_size: usize) -> Result<Answer, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut channel = FramedChannel::with_max_frame_size(stream, max_frame_size);
    let mut accumulator = Accumulator::default();

    loop {
        let command: Command = channel.receive_message().await?;
        debug!(?command, "Received command");

        if let Some(answer) = accumulator.apply(&command) {
            channel.send_message(&answer).await?;
            return Ok(answer);
        }
    }
}
