//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置加载到分发引擎的完整链路
//! - loopback 集群 e2e 测试（每个成员运行真实的 InboundHandler）
//! - 后台复制队列

#[cfg(test)]
mod support {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use contracts::{
        CommandExecutor, ContractError, DispatchConfig, Marshaller, NodeAddress,
        ReplicableCommand, Response, WireFormat,
    };
    use dispatcher::{DispatchEngine, InboundHandler, WireMarshaller};
    use loopback::{Behavior, LoopbackTransport};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum KvCommand {
        Put { key: String, value: String },
        Get { key: String },
    }

    impl ReplicableCommand for KvCommand {
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

    pub fn put(key: &str, value: &str) -> KvCommand {
        KvCommand::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: &str) -> KvCommand {
        KvCommand::Get { key: key.into() }
    }

    /// 成员本地存储；读取不存在的 key 视为执行失败
    #[derive(Default)]
    pub struct KvStore {
        entries: Mutex<HashMap<String, String>>,
    }

    impl KvStore {
        pub fn with(key: &str, value: &str) -> Self {
            let store = Self::default();
            store
                .entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            store
        }
    }

    impl CommandExecutor for KvStore {
        type Command = KvCommand;

        async fn perform(
            &self,
            command: KvCommand,
            _origin: &NodeAddress,
        ) -> Result<Response, ContractError> {
            let mut entries = self.entries.lock().unwrap();
            match command {
                KvCommand::Put { key, value } => {
                    Ok(Response::Value(entries.insert(key, value).map(Bytes::from)))
                }
                KvCommand::Get { key } => entries
                    .get(&key)
                    .map(|v| Response::value(v.clone()))
                    .ok_or_else(|| ContractError::execution("Get", format!("no entry for {key}"))),
            }
        }
    }

    pub type Engine = DispatchEngine<KvCommand, LoopbackTransport, WireMarshaller<KvCommand>>;

    pub struct Cluster {
        pub engine: Arc<Engine>,
        pub transport: LoopbackTransport,
        pub marshaller: Arc<WireMarshaller<KvCommand>>,
    }

    impl Cluster {
        pub fn new(config: DispatchConfig) -> Self {
            let marshaller = Arc::new(WireMarshaller::<KvCommand>::for_format(config.wire_format));
            let encoder = Arc::clone(&marshaller);
            let transport =
                LoopbackTransport::new("origin", move |r: &Response| encoder.encode_response(r));
            let engine = Arc::new(DispatchEngine::new(
                Arc::new(transport.clone()),
                Arc::clone(&marshaller),
                config,
            ));
            Self {
                engine,
                transport,
                marshaller,
            }
        }

        pub fn bincode() -> Self {
            Self::new(DispatchConfig {
                wire_format: WireFormat::Bincode,
                ..DispatchConfig::default()
            })
        }

        /// 成员运行真实的 InboundHandler
        pub fn serve(&self, member: &str, store: KvStore) {
            let handler = InboundHandler::new(Arc::clone(&self.marshaller), Arc::new(store));
            self.transport
                .set_behavior(member, Behavior::serve(Arc::new(handler)));
        }

        pub fn set(&self, member: &str, behavior: Behavior) {
            self.transport.set_behavior(member, behavior);
        }
    }

    pub fn nodes(names: &[&str]) -> Vec<NodeAddress> {
        names.iter().map(|n| NodeAddress::from(*n)).collect()
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::time::{Duration, Instant};

    use contracts::{FirstValidResponse, ReplyFault, Response};
    use dispatcher::{ReplicationRound, RpcError};
    use loopback::{Behavior, SendKind};

    use crate::support::*;

    /// End-to-end test: engine -> loopback -> InboundHandler -> KvStore
    ///
    /// 验证完整的数据流：
    /// 1. 引擎编码命令并发送到每个成员
    /// 2. 成员解码并执行命令
    /// 3. 引擎收集每个成员的回复
    #[tokio::test]
    async fn test_put_reaches_every_member() {
        let cluster = Cluster::bincode();
        for member in ["a", "b", "c"] {
            cluster.serve(member, KvStore::with("k", &format!("old@{member}")));
        }

        let set = cluster
            .engine
            .dispatch(ReplicationRound::wait_for_all(
                put("k", "new"),
                nodes(&["a", "b", "c", "origin"]),
            ))
            .await
            .unwrap()
            .expect("previous values are returned");

        assert_eq!(set.len(), 3);
        assert!(!set.contains("origin"));
        assert_eq!(set.response("b"), Some(&Response::value("old@b")));

        let read = cluster
            .engine
            .dispatch(ReplicationRound::first_acceptable(
                get("k"),
                nodes(&["c"]),
                FirstValidResponse::requiring_value(),
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.response("c"), Some(&Response::value("new")));
    }

    #[tokio::test]
    async fn test_first_acceptable_skips_members_without_value() {
        let cluster = Cluster::bincode();
        cluster.set("a", Behavior::Reply(Response::null()));
        cluster.serve("b", KvStore::with("k", "v"));
        cluster.set("c", Behavior::Reply(Response::null()));

        let set = cluster
            .engine
            .dispatch(ReplicationRound::first_acceptable(
                get("k"),
                nodes(&["a", "b", "c"]),
                FirstValidResponse::requiring_value(),
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.response("b"), Some(&Response::value("v")));
    }

    #[tokio::test]
    async fn test_first_acceptable_reports_every_remote_error() {
        let cluster = Cluster::bincode();
        for member in ["a", "b", "c"] {
            cluster.serve(member, KvStore::default());
        }

        let err = cluster
            .engine
            .dispatch(ReplicationRound::first_acceptable(
                get("missing"),
                nodes(&["a", "b", "c"]),
                FirstValidResponse::requiring_value(),
            ))
            .await
            .unwrap_err();

        match err {
            RpcError::NoAcceptableResponse { errors, .. } => {
                assert_eq!(errors.len(), 3);
                assert!(errors
                    .iter()
                    .all(|(_, fault)| matches!(fault, ReplyFault::Failed(m) if m.contains("no entry for missing"))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fire_and_forget_to_many_members_returns_immediately() {
        let cluster = Cluster::bincode();
        let members: Vec<String> = (0..1000).map(|i| format!("m{i}")).collect();
        for member in &members {
            cluster.set(
                member.as_str(),
                Behavior::Delayed(Duration::from_secs(1), Response::null()),
            );
        }
        let destinations: Vec<&str> = members.iter().map(String::as_str).collect();

        let started = Instant::now();
        let result = cluster
            .engine
            .dispatch(ReplicationRound::fire_and_forget(
                put("k", "v"),
                nodes(&destinations),
            ))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
        let sent = cluster.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SendKind::Forget);
        assert_eq!(sent[0].targets.len(), 1000);
        assert_eq!(cluster.engine.snapshot().fire_and_forget, 1);
    }

    #[tokio::test]
    async fn test_replay_delivers_to_member_that_ignored() {
        let cluster = Cluster::bincode();
        cluster.set(
            "a",
            Behavior::Reply(Response::Extended {
                value: Some("primary".into()),
                replay_ignored: true,
            }),
        );
        cluster.set("b", Behavior::IgnoreOnce(Response::value("replayed")));
        cluster.serve("c", KvStore::with("k", "old"));

        let set = cluster
            .engine
            .dispatch(
                ReplicationRound::wait_for_all(put("k", "v"), nodes(&["a", "b", "c"]))
                    .with_replay(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(set.response("a"), Some(&Response::value("primary")));
        assert_eq!(set.response("b"), Some(&Response::value("replayed")));
        assert_eq!(set.response("c"), Some(&Response::value("old")));
        assert_eq!(cluster.transport.hits("b"), 2);
        assert_eq!(cluster.engine.snapshot().replays, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_the_silent_member() {
        let cluster = Cluster::bincode();
        cluster.serve("a", KvStore::with("k", "v"));
        cluster.serve("b", KvStore::with("k", "v"));
        cluster.set("d", Behavior::Silent);

        let err = cluster
            .engine
            .dispatch(
                ReplicationRound::wait_for_all(put("k", "v2"), nodes(&["a", "b", "d"]))
                    .with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();

        match err {
            RpcError::Timeout { missing, .. } => assert_eq!(missing, nodes(&["d"])),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cluster.engine.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_duplicate_reply_counted_once() {
        let cluster = Cluster::bincode();
        cluster.set("a", Behavior::DuplicateReply(Response::value("once")));
        cluster.serve("b", KvStore::with("k", "old"));

        // Replay-eligible rounds are sent as per-target unicasts.
        let set = cluster
            .engine
            .dispatch(
                ReplicationRound::wait_for_all(put("k", "v"), nodes(&["a", "b"])).with_replay(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.response("a"), Some(&Response::value("once")));
        assert!(cluster
            .transport
            .sent()
            .iter()
            .all(|m| m.kind == SendKind::Unicast));
    }

    #[tokio::test]
    async fn test_closed_transport_fails_round() {
        let cluster = Cluster::bincode();
        cluster.serve("a", KvStore::default());
        cluster.transport.close();

        let err = cluster
            .engine
            .dispatch(ReplicationRound::wait_for_all(put("k", "v"), nodes(&["a"])))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(cluster.engine.snapshot().failures, 1);
    }
}

#[cfg(test)]
mod queue_tests {
    use contracts::{FirstValidResponse, Response};
    use dispatcher::{ReplicationQueue, ReplicationRound};

    use crate::support::*;

    /// 后台队列中的轮次在 shutdown 前全部执行完毕
    #[tokio::test]
    async fn test_background_rounds_update_every_member() {
        let cluster = Cluster::bincode();
        cluster.serve("a", KvStore::default());
        cluster.serve("b", KvStore::default());

        let queue = ReplicationQueue::from_config(cluster.engine.clone());
        for i in 0..3 {
            queue
                .try_submit(ReplicationRound::wait_for_all(
                    put("k", &format!("v{i}")),
                    nodes(&["a", "b"]),
                ))
                .unwrap();
        }
        queue
            .try_submit(ReplicationRound::wait_for_all(put("k", "last"), nodes(&["a", "b"])))
            .unwrap();
        queue.shutdown().await;

        let snapshot = cluster.engine.snapshot();
        assert_eq!(snapshot.queued, 4);
        assert_eq!(snapshot.rounds_completed, 4);
        assert_eq!(cluster.transport.hits("a"), 4);

        for member in ["a", "b"] {
            let set = cluster
                .engine
                .dispatch(ReplicationRound::first_acceptable(
                    get("k"),
                    nodes(&[member]),
                    FirstValidResponse::requiring_value(),
                ))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(set.response(member), Some(&Response::value("last")));
        }
    }
}

#[cfg(test)]
mod config_tests {
    use config_loader::{ConfigFormat, ConfigLoader, FORCE_MULTICAST_ENV};
    use contracts::{RoutingMode, WireFormat};
    use dispatcher::ReplicationRound;
    use loopback::SendKind;

    use crate::support::*;

    const CONFIG: &str = r#"
default_timeout_ms = 2000
async_queue_capacity = 8
wire_format = "json"
"#;

    #[test]
    fn test_loaded_config_drives_round_routing() {
        let config = ConfigLoader::load_with_env(CONFIG, ConfigFormat::Toml, |key| {
            (key == FORCE_MULTICAST_ENV).then(|| "true".to_string())
        })
        .unwrap();

        assert!(config.force_multicast);
        assert_eq!(config.wire_format, WireFormat::Json);

        let round = ReplicationRound::wait_for_all(put("k", "v"), nodes(&["a"])).with_replay();
        assert_eq!(round.routing(config.force_multicast), RoutingMode::Broadcast);
    }

    #[tokio::test]
    async fn test_json_cluster_from_loaded_config() {
        let config = ConfigLoader::load_with_env(CONFIG, ConfigFormat::Toml, |_| None).unwrap();
        let cluster = Cluster::new(config);
        cluster.serve("a", KvStore::with("k", "old"));

        let set = cluster
            .engine
            .dispatch(ReplicationRound::wait_for_all(put("k", "v"), nodes(&["a"])))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(cluster.engine.config().async_queue_capacity, 8);
        assert_eq!(cluster.transport.sent()[0].kind, SendKind::Group);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let err = ConfigLoader::load_with_env(CONFIG, ConfigFormat::Toml, |_| {
            Some("maybe".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(FORCE_MULTICAST_ENV));
    }
}
