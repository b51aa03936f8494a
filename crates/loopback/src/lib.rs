//! # Loopback
//!
//! 进程内 Transport 实现，用于测试与 `gridrep simulate`。
//!
//! 每个远端成员的行为可以单独注入（正常回复、延迟、静默、被怀疑、
//! 重复回调、乱码等），并记录每次发送与每个成员的命中次数，便于断言。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    ContractError, GroupReplies, NodeAddress, RawReply, ReplyFault, ReplyListener, RequestHandler,
    RequestId, Response, SendOptions, Transport,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, trace};

/// 把 Response 编码为线上字节
pub type ResponseEncoder = Arc<dyn Fn(&Response) -> Result<Bytes, ContractError> + Send + Sync>;

/// RequestHandler 的回复
pub type ServeFuture = Pin<Box<dyn Future<Output = Option<Bytes>> + Send>>;

/// 由真实 RequestHandler 处理请求
pub type ServeFn = Arc<dyn Fn(Bytes, NodeAddress) -> ServeFuture + Send + Sync>;

const GARBAGE: &[u8] = b"\xff\xfe garbled reply";

/// 单个成员的行为
#[derive(Clone)]
pub enum Behavior {
    /// 立即回复
    Reply(Response),
    /// 延迟后回复
    Delayed(Duration, Response),
    /// 从不回复
    Silent,
    /// Transport 怀疑该成员已离开
    Suspected,
    /// 请求失败
    Fault(String),
    /// 远端立即报告超时
    RemoteTimeout,
    /// 第一次回复 `Ignored`，之后回复给定 Response
    IgnoreOnce(Response),
    /// 回复无法解码的字节
    Garbled,
    /// 同一个请求回调两次（unicast）
    DuplicateReply(Response),
    /// 交给 RequestHandler 处理
    Serve(ServeFn),
}

impl Behavior {
    /// 用 RequestHandler 构造 `Serve` 行为
    pub fn serve<H>(handler: Arc<H>) -> Self
    where
        H: RequestHandler + Send + Sync + 'static,
    {
        Self::Serve(Arc::new(
            move |payload: Bytes, sender: NodeAddress| -> ServeFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler.handle(payload, sender).await })
            },
        ))
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply(r) => f.debug_tuple("Reply").field(r).finish(),
            Self::Delayed(d, r) => f.debug_tuple("Delayed").field(d).field(r).finish(),
            Self::Silent => f.write_str("Silent"),
            Self::Suspected => f.write_str("Suspected"),
            Self::Fault(m) => f.debug_tuple("Fault").field(m).finish(),
            Self::RemoteTimeout => f.write_str("RemoteTimeout"),
            Self::IgnoreOnce(r) => f.debug_tuple("IgnoreOnce").field(r).finish(),
            Self::Garbled => f.write_str("Garbled"),
            Self::DuplicateReply(r) => f.debug_tuple("DuplicateReply").field(r).finish(),
            Self::Serve(_) => f.write_str("Serve(..)"),
        }
    }
}

/// 发送方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Forget,
    Group,
    Unicast,
}

/// 一次发送的记录
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: SendKind,
    pub targets: Vec<NodeAddress>,
    pub options: SendOptions,
    pub bytes: usize,
}

enum Outcome {
    Once(Result<Bytes, ReplyFault>),
    Twice(Result<Bytes, ReplyFault>),
    Nothing,
}

struct Inner {
    local: NodeAddress,
    encoder: ResponseEncoder,
    closed: AtomicBool,
    behaviors: Mutex<HashMap<NodeAddress, Behavior>>,
    hits: Mutex<HashMap<NodeAddress, usize>>,
    sent: Mutex<Vec<SentMessage>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// 记录命中并取出该成员当前行为；未配置的成员回复 null
    fn visit(&self, target: &NodeAddress) -> (Behavior, usize) {
        let hit = {
            let mut hits = lock(&self.hits);
            let count = hits.entry(target.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let behavior = lock(&self.behaviors)
            .get(target)
            .cloned()
            .unwrap_or_else(|| Behavior::Reply(Response::null()));
        (behavior, hit)
    }

    fn encode(&self, response: &Response) -> Result<Bytes, ReplyFault> {
        (self.encoder)(response).map_err(|e| ReplyFault::Failed(e.to_string()))
    }

    fn record(&self, kind: SendKind, targets: &[NodeAddress], options: SendOptions, bytes: usize) {
        lock(&self.sent).push(SentMessage {
            kind,
            targets: targets.to_vec(),
            options,
            bytes,
        });
    }

    fn check_open(&self) -> Result<(), ContractError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ContractError::transport("loopback transport is closed"))
        } else {
            Ok(())
        }
    }
}

async fn deliver(inner: Arc<Inner>, target: NodeAddress, payload: Bytes) -> Outcome {
    let (behavior, hit) = inner.visit(&target);
    trace!(member = %target, hit, behavior = ?behavior, "Loopback delivery");

    match behavior {
        Behavior::Reply(r) => Outcome::Once(inner.encode(&r)),
        Behavior::Delayed(delay, r) => {
            sleep(delay).await;
            Outcome::Once(inner.encode(&r))
        }
        Behavior::Silent => Outcome::Nothing,
        Behavior::Suspected => Outcome::Once(Err(ReplyFault::Suspected)),
        Behavior::Fault(message) => Outcome::Once(Err(ReplyFault::Failed(message))),
        Behavior::RemoteTimeout => Outcome::Once(Err(ReplyFault::Timeout)),
        Behavior::IgnoreOnce(r) => {
            if hit == 1 {
                Outcome::Once(inner.encode(&Response::Ignored))
            } else {
                Outcome::Once(inner.encode(&r))
            }
        }
        Behavior::Garbled => Outcome::Once(Ok(Bytes::from_static(GARBAGE))),
        Behavior::DuplicateReply(r) => Outcome::Twice(inner.encode(&r)),
        Behavior::Serve(serve) => match serve(payload, inner.local.clone()).await {
            Some(bytes) => Outcome::Once(Ok(bytes)),
            None => Outcome::Nothing,
        },
    }
}

/// 进程内 Transport
///
/// Clone 共享同一份状态，测试可以一份交给引擎，一份留着做断言。
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    /// 创建 transport，`encoder` 用于编码成员的回复
    pub fn new<F>(local: impl Into<NodeAddress>, encoder: F) -> Self
    where
        F: Fn(&Response) -> Result<Bytes, ContractError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                local: local.into(),
                encoder: Arc::new(encoder),
                closed: AtomicBool::new(false),
                behaviors: Mutex::new(HashMap::new()),
                hits: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 设置成员行为
    pub fn set_behavior(&self, member: impl Into<NodeAddress>, behavior: Behavior) {
        lock(&self.inner.behaviors).insert(member.into(), behavior);
    }

    /// 成员收到的消息数
    pub fn hits(&self, member: &str) -> usize {
        lock(&self.inner.hits).get(member).copied().unwrap_or(0)
    }

    /// 所有发送记录（按发送顺序）
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.inner.sent).clone()
    }

    /// 之后的发送全部失败
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    fn local_address(&self) -> NodeAddress {
        self.inner.local.clone()
    }

    async fn send_and_forget(
        &self,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
    ) -> Result<(), ContractError> {
        self.inner.check_open()?;
        self.inner
            .record(SendKind::Forget, targets, options, payload.len());

        for target in targets {
            tokio::spawn(deliver(
                Arc::clone(&self.inner),
                target.clone(),
                payload.clone(),
            ));
        }
        Ok(())
    }

    async fn send_and_await(
        &self,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
        deadline: std::time::Instant,
    ) -> Result<GroupReplies, ContractError> {
        self.inner.check_open()?;
        self.inner
            .record(SendKind::Group, targets, options, payload.len());

        let (tx, mut rx) = mpsc::unbounded_channel();
        for target in targets {
            let tx = tx.clone();
            let inner = Arc::clone(&self.inner);
            let target = target.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                match deliver(inner, target.clone(), payload).await {
                    Outcome::Once(outcome) | Outcome::Twice(outcome) => {
                        let _ = tx.send((target, outcome));
                    }
                    Outcome::Nothing => {}
                }
            });
        }
        // 保留 tx：沉默的成员要等到 deadline
        let _tx = tx;

        let deadline = Instant::from_std(deadline);
        let mut replies = GroupReplies::with_capacity(targets.len());
        while replies.len() < targets.len() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((source, outcome))) => {
                    replies.entry(source).or_insert(outcome);
                }
                Ok(None) | Err(_) => break,
            }
        }
        debug!(
            answered = replies.len(),
            targets = targets.len(),
            "Loopback group send finished"
        );
        Ok(replies)
    }

    fn send_unicast(
        &self,
        request_id: RequestId,
        target: &NodeAddress,
        payload: Bytes,
        options: SendOptions,
        listener: ReplyListener,
    ) -> Result<(), ContractError> {
        self.inner.check_open()?;
        self.inner.record(
            SendKind::Unicast,
            std::slice::from_ref(target),
            options,
            payload.len(),
        );

        let inner = Arc::clone(&self.inner);
        let source = target.clone();
        tokio::spawn(async move {
            let (outcome, times) = match deliver(inner, source.clone(), payload).await {
                Outcome::Once(outcome) => (outcome, 1),
                Outcome::Twice(outcome) => (outcome, 2),
                Outcome::Nothing => return,
            };
            for _ in 0..times {
                listener(RawReply {
                    request_id,
                    source: source.clone(),
                    outcome: outcome.clone(),
                });
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DeliveryMode, RoutingMode};

    fn transport() -> LoopbackTransport {
        LoopbackTransport::new("self", |r: &Response| {
            serde_json::to_vec(r)
                .map(Bytes::from)
                .map_err(|e| ContractError::marshal("Response", e.to_string()))
        })
    }

    fn options() -> SendOptions {
        SendOptions::for_round(DeliveryMode::WaitForAll, RoutingMode::Broadcast, false)
    }

    fn decode(bytes: &Bytes) -> Response {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_group_send_gathers_replies() {
        let t = transport();
        t.set_behavior("a", Behavior::Reply(Response::value("x")));
        t.set_behavior("b", Behavior::Suspected);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let replies = t
            .send_and_await(&["a".into(), "b".into()], Bytes::from_static(b"p"), options(), deadline)
            .await
            .unwrap();

        assert_eq!(decode(replies["a"].as_ref().unwrap()), Response::value("x"));
        assert_eq!(replies["b"], Err(ReplyFault::Suspected));
        assert_eq!(t.sent()[0].kind, SendKind::Group);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_send_stops_at_deadline() {
        let t = transport();
        t.set_behavior(
            "slow",
            Behavior::Delayed(Duration::from_secs(60), Response::null()),
        );

        let deadline = std::time::Instant::now() + Duration::from_millis(100);
        let replies = t
            .send_and_await(&["fast".into(), "slow".into()], Bytes::new(), options(), deadline)
            .await
            .unwrap();

        assert!(replies.contains_key("fast"));
        assert!(!replies.contains_key("slow"));
    }

    #[tokio::test]
    async fn test_unicast_duplicate_callback() {
        let t = transport();
        t.set_behavior("a", Behavior::DuplicateReply(Response::null()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: ReplyListener = Arc::new(move |reply| {
            let _ = tx.send(reply);
        });
        let id = RequestId::next();
        t.send_unicast(id, &"a".into(), Bytes::new(), options(), listener)
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.request_id, id);
        assert_eq!(second.request_id, id);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ignore_once_then_reply() {
        let t = transport();
        t.set_behavior("a", Behavior::IgnoreOnce(Response::value("later")));
        let deadline = std::time::Instant::now() + Duration::from_secs(1);

        let first = t
            .send_and_await(&["a".into()], Bytes::new(), options(), deadline)
            .await
            .unwrap();
        let second = t
            .send_and_await(&["a".into()], Bytes::new(), options(), deadline)
            .await
            .unwrap();

        assert_eq!(decode(first["a"].as_ref().unwrap()), Response::Ignored);
        assert_eq!(decode(second["a"].as_ref().unwrap()), Response::value("later"));
        assert_eq!(t.hits("a"), 2);
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_sends() {
        let t = transport();
        t.close();
        let err = t
            .send_and_forget(&["a".into()], Bytes::new(), options())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Transport { .. }));
    }
}
