//! The single ingress point tying sessions, the debouncer, the reaper, the
//! greeting scheduler, and the reply backend together.
//!
//! Per session: a new message disarms the greeting and feeds the debouncer;
//! a flushed query runs one reply cycle (backend call, reply shaping,
//! outbound send) and then re-arms the greeting after the settle delay.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use {
    parley_channels::ChannelOutbound,
    parley_common::{
        SharedClock,
        types::{InboundMessage, MessageContext, MessageKind, Reply},
    },
    parley_config::{ParleyConfig, ReplyConfig, SessionsConfig},
    parley_greeting::{
        GreetingFn, GreetingRequest, GreetingScheduler, GreetingWindow, WhitelistSource,
    },
    parley_sessions::{Session, SessionRegistry},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{histogram, labels, reply as reply_metrics};

use crate::{
    backend::{ReplyBackend, ReplyOutcome, RetryPolicy, generate_with_retry},
    chunk::split_sentences,
    debounce::{Debouncer, FlushFn},
    error::Result,
    reaper::Reaper,
};

/// Reply sent after the clear command resets a session.
pub const MEMORY_CLEARED: &str = "memory cleared";

/// External collaborators the coordinator talks to.
pub struct Collaborators {
    pub backend: Arc<dyn ReplyBackend>,
    pub outbound: Arc<dyn ChannelOutbound>,
    pub whitelist: Arc<dyn WhitelistSource>,
    pub clock: SharedClock,
}

pub struct DispatchCoordinator {
    sessions: Arc<SessionRegistry>,
    debouncer: Arc<Debouncer>,
    reaper: Arc<Reaper>,
    greetings: Arc<GreetingScheduler>,
    backend: Arc<dyn ReplyBackend>,
    outbound: Arc<dyn ChannelOutbound>,
    retry: RetryPolicy,
    reply: ReplyConfig,
    session_limits: SessionsConfig,
    settle_delay: Duration,
}

impl DispatchCoordinator {
    pub fn new(config: &ParleyConfig, deps: Collaborators) -> Result<Arc<Self>> {
        let window = GreetingWindow::from_config(&config.greeting)?;
        let Collaborators {
            backend,
            outbound,
            whitelist,
            clock,
        } = deps;

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let debouncer = Arc::new(Debouncer::new(&config.debounce));
            let buffering = Arc::clone(&debouncer);
            let greetings = Arc::new(
                GreetingScheduler::with_window(
                    &config.greeting,
                    window,
                    whitelist,
                    clock,
                    greeting_fn(weak.clone()),
                )
                .with_busy_check(Arc::new(move |session_id: &str| {
                    buffering.is_buffering(session_id)
                })),
            );
            let reaper = Arc::new(Reaper::new(
                &config.reaper,
                Arc::clone(&debouncer),
                Some(Arc::clone(&greetings)),
            ));
            Self {
                sessions: Arc::new(SessionRegistry::new(config.sessions.system_prompt.clone())),
                debouncer,
                reaper,
                greetings,
                backend,
                outbound,
                retry: RetryPolicy::from_config(&config.reply),
                reply: config.reply.clone(),
                session_limits: config.sessions.clone(),
                settle_delay: config.greeting.settle_delay(),
            }
        }))
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn debouncer(&self) -> &Arc<Debouncer> {
        &self.debouncer
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    pub fn greetings(&self) -> &Arc<GreetingScheduler> {
        &self.greetings
    }

    /// Handle one inbound message. Returns once the message is buffered (or
    /// answered directly, for commands and unsupported kinds).
    pub async fn on_message(self: &Arc<Self>, msg: InboundMessage) {
        let InboundMessage {
            session_id,
            text,
            kind,
            context,
        } = msg;

        self.greetings.disarm(&session_id);
        self.reaper.maybe_sweep();

        if !self.reply.clear_command.is_empty() && text.trim() == self.reply.clear_command {
            self.sessions
                .get_or_create(&session_id, &context.user_identifier)
                .await;
            self.sessions.clear(&session_id).await;
            info!(session_id = %session_id, "session memory cleared");
            self.deliver(&session_id, vec![Reply::Info(MEMORY_CLEARED.into())], &context)
                .await;
            return;
        }

        let query = match kind {
            MessageKind::Text => text,
            MessageKind::ImageCreate => format!("{}{}", self.reply.image_create_prefix, text),
            MessageKind::Other(other) => {
                debug!(session_id = %session_id, kind = %other, "unsupported message type");
                let reply = Reply::Error(format!("unsupported message type: {other}"));
                self.deliver(&session_id, vec![reply], &context).await;
                return;
            },
        };

        let on_flush = self.flush_fn(context);
        let outcome = self.debouncer.submit(&session_id, &query, on_flush);
        debug!(session_id = %session_id, ?outcome, "fragment submitted");
    }

    /// Cancel pending greetings. Pending queries are left to their timers.
    pub fn shutdown(&self) {
        self.greetings.disarm_all();
    }

    fn flush_fn(self: &Arc<Self>, context: MessageContext) -> FlushFn {
        let weak = Arc::downgrade(self);
        Arc::new(move |session_id: String, query: String| {
            let weak = weak.clone();
            let context = context.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(this) => this.handle_flush(session_id, query, context).await,
                    None => debug!(session_id = %session_id, "coordinator gone, flush dropped"),
                }
            })
        })
    }

    /// One reply cycle for a flushed query.
    async fn handle_flush(self: Arc<Self>, session_id: String, query: String, ctx: MessageContext) {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let session = self.prepare_session(&session_id, &query, &ctx).await;
        if let Err(e) = self.outbound.send_typing(&ctx).await {
            debug!(session_id = %session_id, error = %e, "failed to send typing indicator");
        }

        let replies = match self.generate(&session, &query, &ctx).await {
            Ok(replies) => replies,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "reply backend failed, sending fallback");
                vec![Reply::Text(self.reply.error_reply.clone())]
            },
        };
        self.deliver(&session_id, replies, &ctx).await;

        #[cfg(feature = "metrics")]
        histogram!(
            reply_metrics::CYCLE_DURATION_SECONDS,
            labels::CHANNEL => ctx.reply_to.channel_type.clone()
        )
        .record(start.elapsed().as_secs_f64());

        // New fragments arrived during the cycle; their flush re-arms instead.
        if self.debouncer.is_buffering(&session_id) {
            debug!(session_id = %session_id, "session buffering again, greeting not re-armed");
            return;
        }
        self.greetings
            .arm_after(&session_id, ctx, self.settle_delay);
    }

    async fn handle_greeting(&self, req: GreetingRequest) -> anyhow::Result<()> {
        let GreetingRequest {
            session_id,
            context,
            prompt,
        } = req;
        let created = self
            .sessions
            .get_or_create(&session_id, &context.user_identifier)
            .await;
        let max_tokens = self.session_limits.max_history_tokens;
        let session = self
            .sessions
            .update(&session_id, |s| {
                s.add_query(&prompt);
                s.discard_exceeding(max_tokens);
                s.clone()
            })
            .await
            .unwrap_or(created);
        let replies = self.generate(&session, &prompt, &context).await?;
        self.deliver(&session_id, replies, &context).await;
        Ok(())
    }

    /// Create the session if needed and record the query against it.
    async fn prepare_session(&self, session_id: &str, query: &str, ctx: &MessageContext) -> Session {
        let created = self
            .sessions
            .get_or_create(session_id, &ctx.user_identifier)
            .await;
        let max_messages = self.session_limits.max_conversation_messages;
        let max_tokens = self.session_limits.max_history_tokens;
        self.sessions
            .update(session_id, |s| {
                apply_participants(s, ctx);
                s.count_user_message(max_messages);
                s.add_query(query);
                s.discard_exceeding(max_tokens);
                s.clone()
            })
            .await
            .unwrap_or(created)
    }

    /// Call the backend (with retries) and fold the outcome into the session.
    async fn generate(
        &self,
        session: &Session,
        query: &str,
        ctx: &MessageContext,
    ) -> Result<Vec<Reply>> {
        let ReplyOutcome {
            replies,
            conversation_id,
        } = generate_with_retry(self.backend.as_ref(), &self.retry, session, query, ctx).await?;

        let history: Vec<&str> = replies.iter().filter_map(Reply::as_text).collect();
        let history = history.join("\n");
        self.sessions
            .update(&session.session_id, |s| {
                if s.conversation_id.is_empty()
                    && let Some(id) = conversation_id
                {
                    s.conversation_id = id;
                }
                s.add_reply(&history);
            })
            .await;
        Ok(replies)
    }

    /// Shape and send replies. Send failures are logged, never propagated.
    async fn deliver(&self, session_id: &str, replies: Vec<Reply>, ctx: &MessageContext) {
        let shaped = shape_replies(replies, ctx, &self.reply);
        if shaped.is_empty() {
            debug!(session_id, "backend produced no replies");
            return;
        }
        for reply in &shaped {
            if let Err(e) = self.outbound.send(reply, ctx).await {
                warn!(session_id, error = %e, "failed to send reply");
            }
        }
    }
}

fn greeting_fn(coordinator: Weak<DispatchCoordinator>) -> GreetingFn {
    Arc::new(move |req: GreetingRequest| {
        let coordinator = coordinator.clone();
        Box::pin(async move {
            let Some(this) = coordinator.upgrade() else {
                anyhow::bail!("dispatch coordinator dropped");
            };
            this.handle_greeting(req).await
        })
    })
}

/// Record who the conversation is with.
///
/// Group chats attribute the query to the sender and the room to the peer;
/// shared-session groups have no single user. Private chats have no room.
pub fn apply_participants(session: &mut Session, ctx: &MessageContext) {
    match (ctx.is_group, ctx.shared_session_group) {
        (true, false) => {
            session.set_user_info(&ctx.sender.id, &ctx.sender.nickname);
            session.set_room_info(&ctx.peer.id, &ctx.peer.nickname);
        },
        (true, true) => {
            session.set_user_info("", "");
            session.set_room_info(&ctx.peer.id, &ctx.peer.nickname);
        },
        (false, _) => {
            session.set_user_info(&ctx.peer.id, &ctx.peer.nickname);
            session.set_room_info("", "");
        },
    }
}

/// Apply group mentions to text replies and split the final text reply
/// into sentences.
pub fn shape_replies(replies: Vec<Reply>, ctx: &MessageContext, config: &ReplyConfig) -> Vec<Reply> {
    let prefix = if config.group_mention {
        ctx.mention_prefix()
    } else {
        String::new()
    };
    let count = replies.len();
    let mut shaped = Vec::with_capacity(count);
    for (idx, reply) in replies.into_iter().enumerate() {
        match reply {
            Reply::Text(text) if text.trim().is_empty() => {},
            Reply::Text(text) => {
                let text = format!("{prefix}{text}");
                if idx + 1 == count && config.split_sentences {
                    shaped.extend(split_sentences(&text).into_iter().map(Reply::Text));
                } else {
                    shaped.push(Reply::Text(text));
                }
            },
            other => shaped.push(other),
        }
    }
    shaped
}
