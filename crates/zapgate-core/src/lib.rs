//! Zapgate Core
//!
//! Command pipeline: parse, authorize, cooldown-gate, clamp, dispatch

pub mod command;
pub mod gate;

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use zapgate_config::{ActionLimits, Config, LimitsConfig};
use zapgate_ipc::{EventBus, Inbound, Reply};
use zapgate_openshock::{ActionKind, ControlAction, DeviceControl, OpenShockClient};
use zapgate_policy::AccessPolicy;
use zapgate_telegram::TelegramAdapter;

use command::{ParseFailure, ParsedCommand};
use gate::{CooldownGate, GateDecision};

pub const READY_MESSAGE: &str = "(OpenShock) Bot Ready!";

/// What handling one inbound message resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Group traffic, plain text, or a bare slash. Nothing to do.
    Ignored,
    /// Sender failed the access policy. Denied senders get no reply at all,
    /// so probing for the bot reveals nothing.
    Denied,
    Help,
    /// Slash command with an unrecognized keyword.
    Unknown,
    /// An action argument was present but not numeric.
    BadArguments,
    /// The cooldown for this kind has not elapsed.
    Blocked {
        kind: ActionKind,
        remaining_secs: u64,
    },
    /// The device accepted the action.
    Sent { kind: ActionKind },
    /// The device call failed. Logged, never reported to the sender.
    SendFailed { kind: ActionKind },
}

impl CommandOutcome {
    /// The reply this outcome produces, if any.
    pub fn reply_text(&self, usage: &str) -> Option<String> {
        match self {
            CommandOutcome::Ignored
            | CommandOutcome::Denied
            | CommandOutcome::SendFailed { .. } => None,
            CommandOutcome::Help => Some(usage.to_string()),
            CommandOutcome::Unknown => Some(format!("Unknown command. {}", usage)),
            CommandOutcome::BadArguments => Some(format!(
                "The supplied arguments are not numbers. {}",
                usage
            )),
            CommandOutcome::Blocked {
                kind,
                remaining_secs,
            } => Some(format!(
                "(OpenShock) Next {} available in {} seconds.",
                kind.name_lower(),
                remaining_secs
            )),
            CommandOutcome::Sent { kind } => {
                Some(format!("(OpenShock) {} sent successfully.", kind.name()))
            }
        }
    }
}

/// Resolve a requested value against configured bounds: capped at `max`,
/// then raised to `min`.
pub fn clamp(min: i64, max: i64, value: i64) -> i64 {
    min.max(value.min(max))
}

/// Runs one command end to end. Holds the only shared mutable state, the
/// cooldown gate, next to the immutable policy and limit table.
pub struct ActionDispatcher {
    policy: AccessPolicy,
    shock_limits: ActionLimits,
    vibrate_limits: ActionLimits,
    gate: CooldownGate,
    device: Arc<dyn DeviceControl>,
    usage: String,
}

impl ActionDispatcher {
    pub fn new(policy: AccessPolicy, limits: &LimitsConfig, device: Arc<dyn DeviceControl>) -> Self {
        Self {
            policy,
            shock_limits: limits.shock,
            vibrate_limits: limits.vibrate,
            gate: CooldownGate::new(Instant::now()),
            device,
            usage: command::usage_text(&limits.shock, &limits.vibrate),
        }
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    fn limits(&self, kind: ActionKind) -> &ActionLimits {
        match kind {
            ActionKind::Shock => &self.shock_limits,
            ActionKind::Vibrate => &self.vibrate_limits,
        }
    }

    /// Handle one inbound message. `now` is passed in so tests can drive
    /// the cooldown deterministically.
    pub async fn dispatch(&self, msg: &Inbound, now: Instant) -> CommandOutcome {
        if !msg.private {
            return CommandOutcome::Ignored;
        }
        let text = msg.text.trim();
        if !text.starts_with('/') || text.len() == 1 {
            return CommandOutcome::Ignored;
        }

        // Authorization comes before everything else, including error
        // replies. An unauthorized sender never learns the bot exists.
        if !self.policy.is_authorized(msg.sender_id) {
            warn!("Sender {} denied by access policy", msg.sender_id);
            return CommandOutcome::Denied;
        }

        let parsed = match command::parse(text) {
            Ok(parsed) => parsed,
            Err(ParseFailure::NotANumber) => {
                info!("Non-numeric arguments from sender {}", msg.sender_id);
                return CommandOutcome::BadArguments;
            }
        };

        let (kind, strength, duration_ms) = match parsed {
            ParsedCommand::Help => return CommandOutcome::Help,
            ParsedCommand::Unknown => {
                info!("Unknown command from sender {}", msg.sender_id);
                return CommandOutcome::Unknown;
            }
            ParsedCommand::Action {
                kind,
                strength,
                duration_ms,
            } => (kind, strength, duration_ms),
        };

        let limits = self.limits(kind);
        // The cooldown is committed here, before the device call suspends.
        // A failed device call still burns the cooldown.
        let decision = self
            .gate
            .try_grant(kind, Duration::from_secs(limits.cooldown_secs), now)
            .await;
        if let GateDecision::Blocked { remaining_secs } = decision {
            info!(
                "{} request from {} denied due to cooldown ({}s left)",
                kind, msg.sender_id, remaining_secs
            );
            return CommandOutcome::Blocked {
                kind,
                remaining_secs,
            };
        }

        let action = ControlAction {
            kind,
            intensity: clamp(
                i64::from(limits.strength_min),
                i64::from(limits.strength_max),
                strength,
            ) as u8,
            duration_ms: clamp(
                i64::from(limits.duration_min_ms),
                i64::from(limits.duration_max_ms),
                duration_ms,
            ) as u32,
        };
        info!(
            "{} request from {}: {}% for {}ms",
            kind, msg.sender_id, action.intensity, action.duration_ms
        );

        match self.device.send(action).await {
            Ok(()) => CommandOutcome::Sent { kind },
            Err(err) => {
                error!("{} device call failed: {}", kind, err);
                CommandOutcome::SendFailed { kind }
            }
        }
    }
}

pub struct ZapgateRuntime {
    config: Config,
    event_bus: EventBus,
    dispatcher: Arc<ActionDispatcher>,
    notify_chat_id: Option<i64>,
}

impl ZapgateRuntime {
    pub fn new(config: Config) -> Self {
        let policy = AccessPolicy::new(&config.access);
        let notify_chat_id = policy.notify_target();
        let device = OpenShockClient::new(
            &config.openshock.api_base_url,
            &config.openshock.api_token,
            &config.openshock.device_id,
            &config.openshock.custom_name,
        );
        let dispatcher = ActionDispatcher::new(policy, &config.limits, Arc::new(device));

        Self {
            config,
            event_bus: EventBus::new(),
            dispatcher: Arc::new(dispatcher),
            notify_chat_id,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub async fn run(&self) -> Result<()> {
        info!("Zapgate runtime starting");
        let mut inbound_rx = self.event_bus.subscribe();

        self.start_telegram_adapter()?;
        self.announce_ready();

        loop {
            match inbound_rx.recv().await {
                Ok(msg) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let bus = self.event_bus.clone();
                    tokio::spawn(async move {
                        let outcome = dispatcher.dispatch(&msg, Instant::now()).await;
                        if let Some(text) = outcome.reply_text(dispatcher.usage()) {
                            let reply =
                                Reply::new(msg.chat_id, text).with_reply_to(msg.message_id);
                            if let Err(err) = bus.send_reply(reply) {
                                warn!("Failed to queue reply: {}", err);
                            }
                        }
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, stopping message processor");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event bus lagged by {} messages", n);
                }
            }
        }
        Ok(())
    }

    fn start_telegram_adapter(&self) -> Result<()> {
        let data_dir = self.config.core.data_dir()?;
        let adapter = Arc::new(
            TelegramAdapter::new(&self.config.telegram, data_dir)
                .with_event_bus(self.event_bus.clone()),
        );

        let reply_rx = self.event_bus.reply_subscribe();
        let reply_adapter = Arc::clone(&adapter);
        tokio::spawn(async move {
            reply_adapter.run_reply_handler(reply_rx).await;
        });

        tokio::spawn(async move {
            if let Err(err) = adapter.poll().await {
                error!("Telegram adapter failed: {}", err);
            }
        });
        Ok(())
    }

    fn announce_ready(&self) {
        if let Some(chat_id) = self.notify_chat_id {
            info!("Queueing readiness notice for chat {}", chat_id);
            if let Err(err) = self.event_bus.send_reply(Reply::new(chat_id, READY_MESSAGE)) {
                warn!("Failed to queue readiness notice: {}", err);
            }
        } else {
            info!("No readiness notice target configured");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use zapgate_config::{AccessConfig, AccessMode, IdList};
    use zapgate_openshock::DeviceError;

    struct FakeDevice {
        calls: Mutex<Vec<ControlAction>>,
        fail: bool,
    }

    impl FakeDevice {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        async fn recorded(&self) -> Vec<ControlAction> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl DeviceControl for FakeDevice {
        async fn send(&self, action: ControlAction) -> Result<(), DeviceError> {
            self.calls.lock().await.push(action);
            if self.fail {
                return Err(DeviceError::Status {
                    status: 500,
                    body: "server error".to_string(),
                });
            }
            Ok(())
        }
    }

    fn dispatcher_with(device: Arc<FakeDevice>) -> ActionDispatcher {
        let policy = AccessPolicy::new(&AccessConfig::default());
        ActionDispatcher::new(policy, &LimitsConfig::default(), device)
    }

    fn blacklisting(ids: Vec<i64>, device: Arc<FakeDevice>) -> ActionDispatcher {
        let policy = AccessPolicy::new(&AccessConfig {
            mode: AccessMode::Blacklist,
            ids: IdList::Ids(ids),
            notify_chat_id: None,
        });
        ActionDispatcher::new(policy, &LimitsConfig::default(), device)
    }

    fn private_msg(sender_id: i64, text: &str) -> Inbound {
        Inbound {
            sender_id,
            chat_id: sender_id,
            message_id: 1,
            text: text.to_string(),
            private: true,
        }
    }

    #[tokio::test]
    async fn shock_command_clamps_and_sends() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let outcome = dispatcher.dispatch(&private_msg(7, "/shock 50 5"), now).await;
        assert_eq!(
            outcome,
            CommandOutcome::Sent {
                kind: ActionKind::Shock
            }
        );
        assert_eq!(
            outcome.reply_text(dispatcher.usage()),
            Some("(OpenShock) Shock sent successfully.".to_string())
        );

        // Default shock bounds pin every request to 1% for 300ms.
        assert_eq!(
            device.recorded().await,
            vec![ControlAction {
                kind: ActionKind::Shock,
                intensity: 1,
                duration_ms: 300,
            }]
        );
    }

    #[tokio::test]
    async fn vibrate_requests_clamp_to_their_own_bounds() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let outcome = dispatcher
            .dispatch(&private_msg(7, "/vibrate 150 0.1"), now)
            .await;
        assert_eq!(
            outcome,
            CommandOutcome::Sent {
                kind: ActionKind::Vibrate
            }
        );
        assert_eq!(
            device.recorded().await,
            vec![ControlAction {
                kind: ActionKind::Vibrate,
                intensity: 100,
                duration_ms: 300,
            }]
        );
    }

    #[tokio::test]
    async fn missing_args_are_raised_to_minimums() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));

        dispatcher
            .dispatch(&private_msg(7, "/vibrate"), Instant::now())
            .await;
        assert_eq!(
            device.recorded().await,
            vec![ControlAction {
                kind: ActionKind::Vibrate,
                intensity: 25,
                duration_ms: 300,
            }]
        );
    }

    #[tokio::test]
    async fn second_same_kind_command_hits_cooldown() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        dispatcher.dispatch(&private_msg(7, "/shock 1 0.3"), now).await;
        let outcome = dispatcher
            .dispatch(&private_msg(7, "/shock 1 0.3"), now + Duration::from_secs(1))
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Blocked {
                kind: ActionKind::Shock,
                remaining_secs: 59,
            }
        );
        assert_eq!(
            outcome.reply_text(dispatcher.usage()),
            Some("(OpenShock) Next shock available in 59 seconds.".to_string())
        );
        assert_eq!(device.recorded().await.len(), 1);
    }

    #[tokio::test]
    async fn kinds_cool_down_independently() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let shock = dispatcher.dispatch(&private_msg(7, "/shock 1 0.3"), now).await;
        let vibrate = dispatcher
            .dispatch(&private_msg(7, "/vibrate 30 0.5"), now)
            .await;

        assert!(matches!(shock, CommandOutcome::Sent { .. }));
        assert!(matches!(vibrate, CommandOutcome::Sent { .. }));
        assert_eq!(device.recorded().await.len(), 2);
    }

    #[tokio::test]
    async fn cooldown_expiry_allows_the_next_action() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        dispatcher
            .dispatch(&private_msg(7, "/vibrate 30 0.5"), now)
            .await;
        let outcome = dispatcher
            .dispatch(
                &private_msg(7, "/vibrate 30 0.5"),
                now + Duration::from_secs(10),
            )
            .await;
        assert!(matches!(outcome, CommandOutcome::Sent { .. }));
        assert_eq!(device.recorded().await.len(), 2);
    }

    #[tokio::test]
    async fn bad_arguments_leave_the_gate_untouched() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let outcome = dispatcher
            .dispatch(&private_msg(7, "/vibrate abc 5"), now)
            .await;
        assert_eq!(outcome, CommandOutcome::BadArguments);
        let reply = outcome.reply_text(dispatcher.usage()).unwrap();
        assert!(reply.starts_with("The supplied arguments are not numbers."));
        assert!(reply.contains("Usage:"));
        assert!(device.recorded().await.is_empty());

        // The failed parse must not have burned the cooldown.
        let retry = dispatcher
            .dispatch(&private_msg(7, "/vibrate 30 0.5"), now)
            .await;
        assert!(matches!(retry, CommandOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn unauthorized_sender_gets_silence() {
        let device = FakeDevice::new();
        let dispatcher = blacklisting(vec![666], Arc::clone(&device));
        let now = Instant::now();

        let outcome = dispatcher
            .dispatch(&private_msg(666, "/shock 1 0.3"), now)
            .await;
        assert_eq!(outcome, CommandOutcome::Denied);
        assert_eq!(outcome.reply_text(dispatcher.usage()), None);
        assert!(device.recorded().await.is_empty());

        // The denial must not have touched the gate either.
        let allowed = dispatcher.dispatch(&private_msg(7, "/shock 1 0.3"), now).await;
        assert!(matches!(allowed, CommandOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn unauthorized_help_and_unknown_are_also_silent() {
        let device = FakeDevice::new();
        let dispatcher = blacklisting(vec![666], Arc::clone(&device));
        let now = Instant::now();

        for text in ["/help", "/beep", "/shock abc 1"] {
            let outcome = dispatcher.dispatch(&private_msg(666, text), now).await;
            assert_eq!(outcome, CommandOutcome::Denied, "text: {}", text);
        }
    }

    #[tokio::test]
    async fn group_and_plain_text_are_ignored() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let group = Inbound {
            private: false,
            ..private_msg(7, "/shock 1 0.3")
        };
        assert_eq!(dispatcher.dispatch(&group, now).await, CommandOutcome::Ignored);
        assert_eq!(
            dispatcher.dispatch(&private_msg(7, "hello"), now).await,
            CommandOutcome::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&private_msg(7, "/"), now).await,
            CommandOutcome::Ignored
        );
        assert!(device.recorded().await.is_empty());
    }

    #[tokio::test]
    async fn help_replies_with_usage() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(device);

        let outcome = dispatcher
            .dispatch(&private_msg(7, "/help"), Instant::now())
            .await;
        assert_eq!(outcome, CommandOutcome::Help);
        let reply = outcome.reply_text(dispatcher.usage()).unwrap();
        assert!(reply.starts_with("Usage: /shock|vibrate <strength> <duration>"));
    }

    #[tokio::test]
    async fn unknown_command_mentions_usage() {
        let device = FakeDevice::new();
        let dispatcher = dispatcher_with(device);

        let outcome = dispatcher
            .dispatch(&private_msg(7, "/beep 1 1"), Instant::now())
            .await;
        assert_eq!(outcome, CommandOutcome::Unknown);
        let reply = outcome.reply_text(dispatcher.usage()).unwrap();
        assert!(reply.starts_with("Unknown command."));
        assert!(reply.contains("Usage:"));
    }

    #[tokio::test]
    async fn device_failure_is_logged_not_replied() {
        let device = FakeDevice::failing();
        let dispatcher = dispatcher_with(Arc::clone(&device));
        let now = Instant::now();

        let outcome = dispatcher.dispatch(&private_msg(7, "/shock 1 0.3"), now).await;
        assert_eq!(
            outcome,
            CommandOutcome::SendFailed {
                kind: ActionKind::Shock
            }
        );
        assert_eq!(outcome.reply_text(dispatcher.usage()), None);
        assert_eq!(device.recorded().await.len(), 1);

        // The cooldown was committed before the call, so the failure still
        // burns it.
        let retry = dispatcher
            .dispatch(&private_msg(7, "/shock 1 0.3"), now + Duration::from_secs(1))
            .await;
        assert!(matches!(retry, CommandOutcome::Blocked { .. }));
    }

    #[tokio::test]
    async fn concurrent_same_kind_commands_grant_once() {
        let device = FakeDevice::new();
        let dispatcher = Arc::new(dispatcher_with(Arc::clone(&device)));
        let now = Instant::now();

        let mut handles = Vec::new();
        for sender in [7, 8] {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(&private_msg(sender, "/shock 1 0.3"), now)
                    .await
            }));
        }

        let mut sent = 0;
        let mut blocked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                CommandOutcome::Sent { .. } => sent += 1,
                CommandOutcome::Blocked { .. } => blocked += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(sent, 1);
        assert_eq!(blocked, 1);
        assert_eq!(device.recorded().await.len(), 1);
    }

    #[test]
    fn clamp_resolves_requests_against_bounds() {
        assert_eq!(clamp(25, 100, 50), 50);
        assert_eq!(clamp(25, 100, 150), 100);
        assert_eq!(clamp(25, 100, 7), 25);
        assert_eq!(clamp(25, 100, -3), 25);
        assert_eq!(clamp(1, 1, 0), 1);
    }
}
