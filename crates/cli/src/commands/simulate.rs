//! `simulate` command implementation.
//!
//! Builds a loopback cluster where every member runs a real inbound handler
//! over its own in-memory store, then runs rounds through the dispatch engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use contracts::{
    CommandExecutor, ContractError, DispatchConfig, FirstValidResponse, Marshaller, NodeAddress,
    ReplicableCommand, Response, ResponseEntry,
};
use dispatcher::{DispatchEngine, ReplicationQueue, ReplicationRound, RpcError, WireMarshaller};
use loopback::{Behavior, LoopbackTransport};
use observability::RoundStatsAggregator;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cli::{SimMode, SimulateArgs};
use crate::commands::load_config;
use crate::error::CliError;

const LOCAL: &str = "local";
const KEY: &str = "greeting";

/// Commands understood by simulated members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimCommand {
    Put { key: String, value: String },
    Get { key: String },
}

impl ReplicableCommand for SimCommand {
    fn command_id(&self) -> u8 {
        match self {
            Self::Put { .. } => 1,
            Self::Get { .. } => 2,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Put { .. } => "Put",
            Self::Get { .. } => "Get",
        }
    }

    fn is_idempotent(&self) -> bool {
        true
    }
}

/// In-memory store of one simulated member
struct MemberStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemberStore {
    fn seeded(member: &NodeAddress) -> Self {
        let entries = HashMap::from([(KEY.to_string(), format!("hello from {member}"))]);
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl CommandExecutor for MemberStore {
    type Command = SimCommand;

    async fn perform(
        &self,
        command: SimCommand,
        origin: &NodeAddress,
    ) -> Result<Response, ContractError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(origin = %origin, ?command, "Member executing command");
        match command {
            SimCommand::Put { key, value } => {
                Ok(Response::Value(entries.insert(key, value).map(Bytes::from)))
            }
            SimCommand::Get { key } => Ok(Response::Value(entries.get(&key).cloned().map(Bytes::from))),
        }
    }
}

type SimEngine = DispatchEngine<SimCommand, LoopbackTransport, WireMarshaller<SimCommand>>;

/// Outcome of one simulated round
#[derive(Debug, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub outcome: String,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a whole simulation
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub mode: String,
    pub nodes: usize,
    pub rounds: Vec<RoundReport>,
    pub rounds_started: u64,
    pub rounds_completed: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub replays: u64,
    pub queued: u64,
    pub dropped: u64,
    #[serde(skip)]
    pub stats: RoundStatsAggregator,
}

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => DispatchConfig::default(),
    };

    let report = simulate(args, config).await?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize simulation report")?;
        println!("{}", json);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Run the simulation and collect a report
#[instrument(name = "simulate", skip(args, config), fields(nodes = args.nodes, mode = ?args.mode))]
pub async fn simulate(args: &SimulateArgs, config: DispatchConfig) -> Result<SimulationReport> {
    check_args(args)?;

    let marshaller = Arc::new(WireMarshaller::<SimCommand>::for_format(config.wire_format));
    let encoder = Arc::clone(&marshaller);
    let transport = LoopbackTransport::new(LOCAL, move |r: &Response| encoder.encode_response(r));

    let members: Vec<NodeAddress> = (0..args.nodes)
        .map(|i| NodeAddress::from(format!("node-{i}")))
        .collect();
    for (i, member) in members.iter().enumerate() {
        transport.set_behavior(member.clone(), behavior_for(args, i, member, &marshaller));
    }

    let engine: Arc<SimEngine> = Arc::new(DispatchEngine::new(
        Arc::new(transport.clone()),
        Arc::clone(&marshaller),
        config,
    ));
    info!(members = members.len(), "Loopback cluster ready");

    let mut reports = Vec::with_capacity(args.rounds as usize);
    let mut stats = RoundStatsAggregator::new();

    if args.mode == SimMode::Async {
        let queue = ReplicationQueue::from_config(Arc::clone(&engine));
        for round in 0..args.rounds {
            let outcome = queue.try_submit(build_round(args, round, &members));
            let (outcome, error) = match outcome {
                Ok(()) => ("queued".to_string(), None),
                Err(e) => (e.kind().to_string(), Some(e.to_string())),
            };
            stats.update(&outcome, 0.0, 0, &[]);
            reports.push(RoundReport {
                round,
                outcome,
                latency_ms: 0.0,
                entries: BTreeMap::new(),
                error,
            });
        }
        queue.shutdown().await;
    } else {
        for round in 0..args.rounds {
            let started = Instant::now();
            let result = engine.dispatch(build_round(args, round, &members)).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let report = match result {
                Ok(Some(set)) => {
                    let entries: BTreeMap<String, String> = set
                        .iter()
                        .map(|(address, entry)| (address.to_string(), describe(entry)))
                        .collect();
                    stats.update("ok", latency_ms, entries.len(), &[]);
                    RoundReport {
                        round,
                        outcome: "ok".to_string(),
                        latency_ms,
                        entries,
                        error: None,
                    }
                }
                Ok(None) => {
                    stats.update("ok", latency_ms, 0, &[]);
                    RoundReport {
                        round,
                        outcome: "no_result".to_string(),
                        latency_ms,
                        entries: BTreeMap::new(),
                        error: None,
                    }
                }
                Err(e) => {
                    let missing = match &e {
                        RpcError::Timeout { missing, .. } => missing.clone(),
                        _ => Vec::new(),
                    };
                    stats.update(e.kind(), latency_ms, 0, &missing);
                    RoundReport {
                        round,
                        outcome: e.kind().to_string(),
                        latency_ms,
                        entries: BTreeMap::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
    }
    engine.shutdown();

    let snapshot = engine.snapshot();
    Ok(SimulationReport {
        mode: format!("{:?}", args.mode).to_lowercase(),
        nodes: args.nodes,
        rounds: reports,
        rounds_started: snapshot.rounds_started,
        rounds_completed: snapshot.rounds_completed,
        timeouts: snapshot.timeouts,
        failures: snapshot.failures,
        replays: snapshot.replays,
        queued: snapshot.queued,
        dropped: snapshot.dropped,
        stats,
    })
}

fn check_args(args: &SimulateArgs) -> Result<(), CliError> {
    if args.nodes == 0 {
        return Err(CliError::simulation("--nodes must be at least 1"));
    }
    if let Some(slow) = args.slow_node {
        if slow >= args.nodes {
            return Err(CliError::simulation(format!(
                "--slow-node {slow} is out of range for {} nodes",
                args.nodes
            )));
        }
    }
    if args.timeout_ms == Some(0) {
        return Err(CliError::simulation("--timeout-ms must be positive"));
    }
    if args.replay && args.mode != SimMode::All {
        return Err(CliError::simulation("--replay only applies to --mode all"));
    }
    Ok(())
}

fn behavior_for(
    args: &SimulateArgs,
    index: usize,
    member: &NodeAddress,
    marshaller: &Arc<WireMarshaller<SimCommand>>,
) -> Behavior {
    if args.slow_node == Some(index) {
        return Behavior::Delayed(
            Duration::from_millis(args.slow_ms),
            Response::value(format!("late answer from {member}")),
        );
    }
    if args.replay && index == 0 {
        return Behavior::Reply(Response::Extended {
            value: Some(Bytes::from(format!("stored on {member}"))),
            replay_ignored: true,
        });
    }
    if args.replay && index + 1 == args.nodes {
        return Behavior::IgnoreOnce(Response::value(format!("stored on {member} after replay")));
    }
    let handler = dispatcher::InboundHandler::new(
        Arc::clone(marshaller),
        Arc::new(MemberStore::seeded(member)),
    );
    Behavior::serve(Arc::new(handler))
}

fn build_round(args: &SimulateArgs, round: u32, members: &[NodeAddress]) -> ReplicationRound<SimCommand> {
    let destinations = members.iter().cloned();
    let mut built = match args.mode {
        SimMode::Async => ReplicationRound::fire_and_forget(put(round), destinations),
        SimMode::All => ReplicationRound::wait_for_all(put(round), destinations),
        SimMode::First => ReplicationRound::first_acceptable(
            SimCommand::Get { key: KEY.into() },
            destinations,
            FirstValidResponse::requiring_value(),
        ),
    };
    if let Some(ms) = args.timeout_ms {
        built = built.with_timeout(Duration::from_millis(ms));
    }
    if args.replay {
        built = built.with_replay();
    }
    built
}

fn put(round: u32) -> SimCommand {
    SimCommand::Put {
        key: KEY.into(),
        value: format!("round {round}"),
    }
}

fn describe(entry: &ResponseEntry) -> String {
    if entry.suspected {
        return "suspected".to_string();
    }
    match &entry.response {
        None => "no response".to_string(),
        Some(Response::Value(None)) | Some(Response::Extended { value: None, .. }) => {
            "null".to_string()
        }
        Some(Response::Value(Some(bytes))) | Some(Response::Extended { value: Some(bytes), .. }) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        Some(Response::Ignored) => "ignored".to_string(),
        Some(Response::Failure(failure)) => format!("failure: {failure}"),
    }
}

fn print_report(report: &SimulationReport) {
    println!(
        "Simulated {} round(s) in mode '{}' across {} member(s)",
        report.rounds.len(),
        report.mode,
        report.nodes
    );
    for round in &report.rounds {
        println!();
        println!(
            "Round {} ─ {} ({:.2}ms)",
            round.round, round.outcome, round.latency_ms
        );
        for (member, value) in &round.entries {
            println!("  ├─ {member}: {value}");
        }
        if let Some(error) = &round.error {
            println!("  └─ error: {error}");
        }
    }
    println!();
    print!("{}", report.stats.summary());
    println!(
        "Engine: started={} completed={} timeouts={} failures={} replays={} queued={} dropped={}",
        report.rounds_started,
        report.rounds_completed,
        report.timeouts,
        report.failures,
        report.replays,
        report.queued,
        report.dropped
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(mode: SimMode) -> SimulateArgs {
        SimulateArgs {
            config: None,
            nodes: 3,
            mode,
            slow_node: None,
            slow_ms: 2000,
            timeout_ms: None,
            replay: false,
            rounds: 1,
            json: false,
        }
    }

    #[tokio::test]
    async fn test_wait_for_all_collects_every_member() {
        let report = simulate(&args(SimMode::All), DispatchConfig::default())
            .await
            .unwrap();
        let round = &report.rounds[0];
        assert_eq!(round.outcome, "ok");
        assert_eq!(round.entries.len(), 3);
        assert_eq!(round.entries["node-1"], "hello from node-1");
    }

    #[tokio::test]
    async fn test_first_acceptable_returns_one_member() {
        let report = simulate(&args(SimMode::First), DispatchConfig::default())
            .await
            .unwrap();
        assert_eq!(report.rounds[0].entries.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_member_times_out() {
        let mut a = args(SimMode::All);
        a.slow_node = Some(2);
        a.slow_ms = 5_000;
        a.timeout_ms = Some(100);

        let report = simulate(&a, DispatchConfig::default()).await.unwrap();
        let round = &report.rounds[0];
        assert_eq!(round.outcome, "timeout");
        assert!(round.error.as_ref().unwrap().contains("node-2"));
        assert_eq!(report.timeouts, 1);
    }

    #[tokio::test]
    async fn test_replay_reaches_ignoring_member() {
        let mut a = args(SimMode::All);
        a.replay = true;

        let report = simulate(&a, DispatchConfig::default()).await.unwrap();
        let round = &report.rounds[0];
        assert_eq!(round.entries["node-2"], "stored on node-2 after replay");
        assert_eq!(report.replays, 1);
    }

    #[tokio::test]
    async fn test_async_rounds_are_queued() {
        let mut a = args(SimMode::Async);
        a.rounds = 3;

        let report = simulate(&a, DispatchConfig::default()).await.unwrap();
        assert!(report.rounds.iter().all(|r| r.outcome == "queued"));
        assert_eq!(report.queued, 3);
        assert_eq!(report.rounds_completed, 3);
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let mut a = args(SimMode::All);
        a.slow_node = Some(3);
        assert!(simulate(&a, DispatchConfig::default()).await.is_err());

        let mut b = args(SimMode::First);
        b.replay = true;
        assert!(simulate(&b, DispatchConfig::default()).await.is_err());
    }
}
