use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use warden_database::model::cases::{Case, CaseId, RoleCaseData};

const DEFAULT_CAPACITY: usize = 256;

/// Emitted whenever a case is written or its pardon state changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaseEvent {
    Created {
        case: Case,
        role: Option<RoleCaseData>,
    },
    Reversed {
        original_case_id: CaseId,
        case: Case,
    },
    Pardoned {
        case: Case,
    },
}

/// Fan-out point for notifiers and loggers. Subscribers that fall behind lose
/// the oldest events.
#[derive(Clone, Debug)]
pub struct CaseHook {
    sender: broadcast::Sender<CaseEvent>,
}

impl Default for CaseHook {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CaseHook {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaseEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: CaseEvent) {
        if self.sender.send(event).is_err() {
            debug!("case event dropped; no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_database::model::cases::{ActionType, Actor, Case, Expiry};

    use super::{CaseEvent, CaseHook};

    fn case() -> Case {
        Case {
            id: 3,
            guild_id: 1,
            target_id: 30,
            mod_id: 20,
            reason: None,
            action: ActionType::Warn,
            created_at: 1_000,
            expiry: Expiry::Permanent,
            pardoned_by: Some(Actor::System),
            reverses_case_id: None,
        }
    }

    #[test]
    fn events_are_tagged_for_consumers() {
        let payload = serde_json::to_value(CaseEvent::Pardoned { case: case() }).unwrap();
        assert_eq!(payload["event"], "pardoned");
        assert_eq!(payload["case"]["action"], "warn");
        assert_eq!(payload["case"]["pardoned_by"]["kind"], "system");
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let hook = CaseHook::new(4);
        let mut first = hook.subscribe();
        let mut second = hook.subscribe();

        hook.emit(CaseEvent::Pardoned { case: case() });

        assert_eq!(first.recv().await.unwrap(), CaseEvent::Pardoned { case: case() });
        assert_eq!(second.recv().await.unwrap(), CaseEvent::Pardoned { case: case() });
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        CaseHook::default().emit(CaseEvent::Pardoned { case: case() });
    }
}
