//! Strategies running in their own process.
//!
//! The engine listens on a loopback port, starts the agent with that port as its first
//! argument and waits for it to connect. From then on both sides exchange one JSON object
//! per line.
//!
//! Engine to agent:
//!
//! ```text
//! {"op":"move","view":{...}}        choose the real move for this view
//! {"op":"shadow","view":{...}}      answer a shadow request for this view
//! {"op":"drawn","value":N}          answer to an entropy request
//! ```
//!
//! Agent to engine:
//!
//! ```text
//! {"kind":"choose","n":N}           draw an index in 0..N from my stream
//! {"kind":"unit"}                   draw a real in [0,1) from my stream, sent as f64 bits
//! {"kind":"play","mv":"ROCK"}
//! {"kind":"shadow","wants":true,"shadow_move":"SPOCK"}
//! {"kind":"fault","reason":"..."}
//! ```
//!
//! Entropy never leaves the engine: the agent asks for every value it needs, and each value
//! is drawn from the stream of the side the agent plays. A reply deadline covers the whole
//! exchange of one request. When it passes the agent process is killed, and every later
//! call fails at once.

use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::{Ipv4Addr, TcpListener, TcpStream},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    configuration::Configuration,
    deception::ShadowRequest,
    moves::Move,
    rng::Entropy,
    rules::{Rules, DEFAULT_ACTION_TIMEOUT},
    sandbox::{LimitedProcess, MAX_AGENT_PIDS},
    strategy::{StateView, Strategy},
};

/// How long a freshly started agent has to connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine to agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Choose the real move.
    Move {
        /// What the agent may observe.
        view: StateView,
    },
    /// Answer a shadow request.
    Shadow {
        /// What the agent may observe.
        view: StateView,
    },
    /// A value drawn from the agent's stream: an index, or the bits of an `f64`.
    Drawn {
        /// The drawn value.
        value: u64,
    },
}

/// Agent to engine message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Draw an index in `0..n`.
    Choose {
        /// Exclusive upper bound.
        n: usize,
    },
    /// Draw a real in `[0, 1)`.
    Unit,
    /// The real move. Kept as text so that garbage can be reported as such.
    Play {
        /// Move name, e.g. `ROCK`.
        mv: String,
    },
    /// Answer to a shadow request.
    Shadow {
        /// Whether to spend a token on a shadow.
        wants: bool,
        /// Move name of the shadow, when one is wanted.
        shadow_move: Option<String>,
    },
    /// The agent failed to answer.
    Fault {
        /// Why, as reported by the agent.
        reason: String,
    },
}

/// Program to run for an agent. The port is passed before `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Extra arguments, after the port.
    pub args: Vec<String>,
}

impl AgentCommand {
    /// Agent started as `program <port>`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Limits applied to agent processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Deadline for the whole exchange of one request.
    pub reply_timeout: Duration,
    /// Memory limit of the agent's cgroup, in MB.
    pub max_memory_mb: Option<u64>,
    /// Start the agent without a cgroup when one cannot be created.
    pub allow_uncontained: bool,
    /// Let the agent write to the engine's stderr.
    pub allow_stderr: bool,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_ACTION_TIMEOUT,
            max_memory_mb: None,
            allow_uncontained: false,
            allow_stderr: false,
        }
    }
}

impl ProcessLimits {
    /// Limits matching the league's rules and runner configuration.
    pub fn new(rules: &Rules, config: &Configuration) -> Self {
        Self {
            reply_timeout: rules.action_timeout(),
            max_memory_mb: None,
            allow_uncontained: config.allow_uncontained,
            allow_stderr: config.debug_agent_stderr,
        }
    }

    /// Sets the memory limit of each agent's cgroup.
    #[must_use]
    pub fn with_max_memory_mb(self, mb: u64) -> Self {
        Self {
            max_memory_mb: Some(mb),
            ..self
        }
    }
}

/// One JSON object per line over a TCP stream.
struct Channel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    line: String,
}

impl Channel {
    fn new(stream: TcpStream) -> anyhow::Result<Self> {
        stream.set_nodelay(true).context("could not set TCP_NODELAY")?;
        let writer = stream.try_clone().context("could not clone stream")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            line: String::new(),
        })
    }

    fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let mut bytes = serde_json::to_vec(msg).context("could not encode message")?;
        bytes.push(b'\n');
        self.writer
            .write_all(&bytes)
            .context("I/O error while sending msg")
    }

    /// Next message, waiting until `deadline` at most. `None` waits forever.
    fn receive<T: DeserializeOwned>(&mut self, deadline: Option<Instant>) -> anyhow::Result<T> {
        let timeout = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    bail!("reply deadline passed");
                }
                Some(left)
            }
            None => None,
        };
        self.reader
            .get_ref()
            .set_read_timeout(timeout)
            .context("could not set read timeout")?;
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => bail!("connection closed"),
            Ok(_) => serde_json::from_str(self.line.trim_end())
                .with_context(|| format!("malformed message {:?}", self.line.trim_end())),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                bail!("reply deadline passed")
            }
            Err(e) => Err(e).context("error while reading stream"),
        }
    }
}

/// Engine side of an agent process.
///
/// The process is killed when this is dropped.
pub struct ProcessStrategy {
    name: String,
    process: LimitedProcess,
    channel: Option<Channel>,
    reply_timeout: Duration,
}

impl ProcessStrategy {
    /// Start `command` and wait for it to connect.
    ///
    /// # Errors
    /// The process cannot be started (in a cgroup, unless uncontained agents are allowed), or
    /// it does not connect within [`CONNECT_TIMEOUT`].
    #[instrument(skip(command, limits), fields(program = %command.program.display()))]
    pub fn launch(
        name: &str,
        command: &AgentCommand,
        limits: &ProcessLimits,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .context("server error: could not create TcpListener")?;
        let port = listener.local_addr()?.port();
        let mut args = vec![port.to_string()];
        args.extend(command.args.iter().cloned());

        let max_memory = limits
            .max_memory_mb
            .map_or(0, |mb| i64::try_from(mb.saturating_mul(1_000_000)).unwrap_or(i64::MAX));
        let process = match LimitedProcess::launch(
            &command.program,
            &args,
            max_memory,
            MAX_AGENT_PIDS,
            limits.allow_stderr,
        ) {
            Ok(process) => process,
            Err(e) if limits.allow_uncontained => {
                warn!("running '{name}' uncontained: {e:#}");
                LimitedProcess::launch_without_container(
                    &command.program,
                    &args,
                    limits.allow_stderr,
                )?
            }
            Err(e) => return Err(e.context("server error: child + cgroup creation failed")),
        };

        listener
            .set_nonblocking(true)
            .context("server error: setting non-blocking to true")?;
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        let stream = loop {
            match listener.accept() {
                Ok((stream, _addr)) => break stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() > deadline {
                        bail!("agent '{name}' did not connect within {CONNECT_TIMEOUT:?}");
                    }
                    thread::sleep(Duration::from_millis(10).min(CONNECT_TIMEOUT / 10));
                }
                Err(e) => return Err(e).context("server error: accepting agent connection"),
            }
        };
        stream
            .set_nonblocking(false)
            .context("server error: setting blocking for 'read'")?;
        debug!(pid = process.id(), port, "agent connected");

        Ok(Self {
            name: name.to_string(),
            process,
            channel: Some(Channel::new(stream)?),
            reply_timeout: limits.reply_timeout,
        })
    }

    /// `false` once the agent was killed.
    pub fn is_alive(&self) -> bool {
        self.channel.is_some()
    }

    /// Send `request`, serve the entropy the agent asks for, and return its final answer.
    fn converse(
        &mut self,
        request: &Request,
        mut entropy: Option<&mut dyn Entropy>,
    ) -> anyhow::Result<AgentMessage> {
        let deadline = Instant::now() + self.reply_timeout;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| anyhow!("agent '{}' is dead", self.name))?;
        let result = (|| {
            channel.send(request)?;
            loop {
                let message: AgentMessage = channel.receive(Some(deadline))?;
                let drawn = match message {
                    AgentMessage::Choose { n } => {
                        entropy.as_deref_mut().map(|e| e.choose_index(n) as u64)
                    }
                    AgentMessage::Unit => entropy.as_deref_mut().map(|e| e.unit().to_bits()),
                    answer => return Ok(answer),
                };
                let Some(value) = drawn else {
                    bail!("entropy requested outside of move production");
                };
                channel.send(&Request::Drawn { value })?;
            }
        })();
        if result.is_err() {
            self.kill();
        }
        result
    }

    fn kill(&mut self) {
        self.channel = None;
        if let Err(e) = self.process.try_kill(Duration::from_secs(1)) {
            warn!("could not kill agent '{}': {e:#}", self.name);
        }
    }
}

impl Strategy for ProcessStrategy {
    fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        match self.converse(&Request::Move { view: *view }, Some(entropy))? {
            AgentMessage::Play { mv } => Ok(mv.parse::<Move>()?),
            AgentMessage::Fault { reason } => bail!("agent fault: {reason}"),
            other => {
                self.kill();
                bail!("unexpected answer to a move request: {other:?}")
            }
        }
    }

    fn request_shadow(&mut self, view: &StateView) -> anyhow::Result<ShadowRequest> {
        match self.converse(&Request::Shadow { view: *view }, None)? {
            AgentMessage::Shadow { wants, shadow_move } => Ok(ShadowRequest {
                wants_shadow: wants,
                shadow_move: shadow_move.map(|m| m.parse()).transpose()?,
            }),
            AgentMessage::Fault { reason } => bail!("agent fault: {reason}"),
            other => {
                self.kill();
                bail!("unexpected answer to a shadow request: {other:?}")
            }
        }
    }
}

/// Entropy fetched from the engine, one value per request.
struct RemoteEntropy<'a> {
    channel: &'a mut Channel,
    failure: Option<anyhow::Error>,
}

impl RemoteEntropy<'_> {
    fn draw(&mut self, request: AgentMessage) -> u64 {
        if self.failure.is_some() {
            return 0;
        }
        let drawn = self.channel.send(&request).and_then(|()| {
            match self.channel.receive::<Request>(None)? {
                Request::Drawn { value } => Ok(value),
                other => bail!("expected a drawn value, got {other:?}"),
            }
        });
        drawn.unwrap_or_else(|e| {
            self.failure = Some(e);
            0
        })
    }
}

impl Entropy for RemoteEntropy<'_> {
    fn choose_index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let index = self.draw(AgentMessage::Choose { n });
        usize::try_from(index).unwrap_or(0).min(n - 1)
    }

    fn unit(&mut self) -> f64 {
        f64::from_bits(self.draw(AgentMessage::Unit))
    }
}

/// Agent side: connect to the engine on `port` and answer its requests with `strategy`
/// until the engine hangs up.
pub fn serve(mut strategy: Box<dyn Strategy>, port: u16) -> anyhow::Result<()> {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        .with_context(|| format!("could not connect to engine on port {port}"))?;
    let mut channel = Channel::new(stream)?;
    loop {
        let request = match channel.receive::<Request>(None) {
            Ok(request) => request,
            Err(e) => {
                debug!("engine gone: {e:#}");
                return Ok(());
            }
        };
        let answer = match request {
            Request::Move { view } => {
                let mut entropy = RemoteEntropy {
                    channel: &mut channel,
                    failure: None,
                };
                let result = strategy.produce_move(&view, &mut entropy);
                if let Some(e) = entropy.failure {
                    return Err(e.context("entropy exchange failed"));
                }
                match result {
                    Ok(m) => AgentMessage::Play {
                        mv: m.name().to_string(),
                    },
                    Err(e) => AgentMessage::Fault {
                        reason: format!("{e:#}"),
                    },
                }
            }
            Request::Shadow { view } => match strategy.request_shadow(&view) {
                Ok(request) => AgentMessage::Shadow {
                    wants: request.wants_shadow,
                    shadow_move: request.shadow_move.map(|m| m.name().to_string()),
                },
                Err(e) => AgentMessage::Fault {
                    reason: format!("{e:#}"),
                },
            },
            Request::Drawn { .. } => AgentMessage::Fault {
                reason: "unexpected drawn value".to_string(),
            },
        };
        channel.send(&answer)?;
    }
}
