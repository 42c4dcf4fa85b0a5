//! Inbound message routing
//!
//! Each text frame goes through parse, rate limit, then dispatch by `op`.
//! Frames that fail to parse are answered but neither consume rate budget
//! nor count as activity. Everything past the parse step touches the session.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};
use types::category::{Category, Topic};
use types::ids::ConnectionId;
use types::pair::Pair;

use crate::auth::AuthGate;
use crate::error::HubError;
use crate::index::SubscriptionIndex;
use crate::metrics::HubMetrics;
use crate::protocol::{ClientMessage, Op, ServerMessage};
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;

/// Error reply together with the pair it concerns, if any
type Rejection = (HubError, Option<String>);

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    index: Arc<SubscriptionIndex>,
    limiter: Arc<RateLimiter>,
    auth: Arc<AuthGate>,
    metrics: Arc<HubMetrics>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        auth: Arc<AuthGate>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let index = Arc::clone(registry.index());
        Self {
            registry,
            index,
            limiter,
            auth,
            metrics,
        }
    }

    /// Handle one text frame and queue the reply on the connection.
    pub async fn process(&self, id: ConnectionId, raw: &str) -> ServerMessage {
        let reply = self.handle(id, raw).await;
        self.send(id, &reply);
        reply
    }

    /// Answer a binary frame, which the protocol does not define.
    pub fn reject_binary(&self, id: ConnectionId) -> ServerMessage {
        HubMetrics::incr(&self.metrics.messages_received);
        HubMetrics::incr(&self.metrics.messages_malformed);
        let reply = self.reject(
            id,
            HubError::MalformedMessage("binary frames are not supported".to_string()),
            None,
        );
        self.send(id, &reply);
        reply
    }

    /// Handle one text frame and return the reply without sending it.
    pub async fn handle(&self, id: ConnectionId, raw: &str) -> ServerMessage {
        HubMetrics::incr(&self.metrics.messages_received);

        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                HubMetrics::incr(&self.metrics.messages_malformed);
                return self.reject(id, err, None);
            }
        };

        let Some(identity) = self.registry.identity(id) else {
            return self.reject(id, HubError::UnknownConnection(id), None);
        };
        if !self.limiter.allow(&identity) {
            HubMetrics::incr(&self.metrics.messages_rate_limited);
            warn!(conn_id = %id, identity = %identity, "Rate limited");
            return self.reject(id, HubError::RateLimited, None);
        }

        let outcome = self.dispatch(id, &message).await;

        self.registry.touch(id);
        self.registry.refresh_activity(id);

        match outcome {
            Ok(reply) => {
                debug!(conn_id = %id, op = %message.op, "Handled");
                reply
            }
            Err((err, pair)) => self.reject(id, err, pair),
        }
    }

    async fn dispatch(&self, id: ConnectionId, message: &ClientMessage) -> Result<ServerMessage, Rejection> {
        let op = Op::parse(&message.op)
            .ok_or_else(|| (HubError::InvalidOp(message.op.clone()), None))?;
        let content = message.content.as_str();

        match op {
            Op::SubPair => {
                let pair = parse_pair(content)?;
                let covered = self
                    .index
                    .subscribe_pair(id, &pair)
                    .map_err(|e| (e, Some(pair.to_string())))?;
                Ok(ServerMessage::ok(
                    "subscribed",
                    op.as_str(),
                    Some(pair.to_string()),
                    json!(covered),
                ))
            }
            Op::Sub => {
                let (pair, category) = parse_topic(content)?;
                self.index
                    .subscribe(id, &pair, category)
                    .map_err(|e| (e, Some(pair.to_string())))?;
                Ok(ServerMessage::ok(
                    "subscribed",
                    category.as_str(),
                    Some(pair.to_string()),
                    json!([Topic::render(&pair, category)]),
                ))
            }
            Op::Unsub => {
                let (pair, category) = parse_topic(content)?;
                self.index
                    .unsubscribe(id, &pair, category)
                    .map_err(|e| (e, Some(pair.to_string())))?;
                Ok(ServerMessage::ok(
                    "unsubscribed",
                    category.as_str(),
                    Some(pair.to_string()),
                    json!([]),
                ))
            }
            Op::UnsubPair => {
                let pair = parse_pair(content)?;
                self.index
                    .unsubscribe_pair(id, &pair)
                    .map_err(|e| (e, Some(pair.to_string())))?;
                Ok(ServerMessage::ok(
                    "unsubscribed",
                    op.as_str(),
                    Some(pair.to_string()),
                    json!([]),
                ))
            }
            Op::UnsubAll => {
                self.index.unsubscribe_all(id);
                Ok(ServerMessage::ok("unsubscribed", op.as_str(), None, json!([])))
            }
            Op::Subscriptions => {
                let topics = self.index.list_subscriptions(id);
                Ok(ServerMessage::ok("subscriptions", op.as_str(), None, json!(topics)))
            }
            Op::AuthApi => {
                self.auth
                    .authenticate(id, content)
                    .await
                    .map_err(|e| (e, None))?;
                Ok(ServerMessage::ok("authenticated", op.as_str(), None, Value::Null))
            }
            Op::Status => Ok(ServerMessage::ok(
                "ok",
                op.as_str(),
                None,
                json!({
                    "connection_id": id.as_u64(),
                    "authenticated": self.registry.account_of(id).is_some(),
                    "subscriptions": self.index.subscription_count(id),
                }),
            )),
        }
    }

    fn reject(&self, id: ConnectionId, err: HubError, pair: Option<String>) -> ServerMessage {
        HubMetrics::incr(&self.metrics.errors_replied);
        match err {
            HubError::SubscriptionLimitExceeded { .. } | HubError::ConnectionLimitExceeded { .. } => {
                warn!(conn_id = %id, error = %err, "Limit rejected message")
            }
            _ => debug!(conn_id = %id, code = err.code(), error = %err, "Rejected message"),
        }
        ServerMessage::error(&err, pair)
    }

    fn send(&self, id: ConnectionId, reply: &ServerMessage) {
        match reply.to_frame() {
            Ok(frame) => {
                self.registry.deliver(id, frame);
            }
            Err(e) => debug!(conn_id = %id, error = %e, "Failed to encode reply"),
        }
    }
}

fn parse_pair(raw: &str) -> Result<Pair, Rejection> {
    Pair::parse(raw).map_err(|_| (HubError::InvalidPair(raw.to_string()), None))
}

/// Parse `"<pair>:<category>"`.
fn parse_topic(raw: &str) -> Result<(Pair, Category), Rejection> {
    let (pair_raw, category_raw) = Topic::split_raw(raw).map_err(|_| {
        (
            HubError::InvalidCategory(format!("expected <pair>:<category>, got {raw}")),
            None,
        )
    })?;
    let pair = parse_pair(pair_raw)?;
    let category = category_raw.parse::<Category>().map_err(|_| {
        (
            HubError::InvalidCategory(category_raw.to_string()),
            Some(pair.to_string()),
        )
    })?;
    Ok((pair, category))
}
