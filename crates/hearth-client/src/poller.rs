//! Keeps an open conversation in sync with the server.
//!
//! A [`ConversationPoller`] is created when a conversation is opened and
//! dropped when it is closed. Each tick fetches the whole message set,
//! narrows it to the conversation, and publishes the result as one
//! [`ConversationView`] snapshot. When the count grows and the newest line
//! came from someone else, the chime plays. Unread messages addressed to
//! the local user are marked read in the background.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_media::Chime;
use hearth_shared::{DirectMessage, GroupId, GroupMessage, MessageId, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::ports::MessageFeed;
use crate::schedule::{spawn_poll, Liveness, PollHandle, Tick};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    Direct(UserId),
    Group(GroupId),
}

/// One rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Group messages carry no id.
    pub id: Option<MessageId>,
    pub from: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl From<DirectMessage> for ChatLine {
    fn from(m: DirectMessage) -> Self {
        Self {
            id: Some(m.id),
            from: m.from,
            content: m.content,
            sent_at: m.sent_at,
        }
    }
}

impl From<GroupMessage> for ChatLine {
    fn from(m: GroupMessage) -> Self {
        Self {
            id: None,
            from: m.from,
            content: m.content,
            sent_at: m.sent_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationView {
    /// Oldest first.
    pub lines: Vec<ChatLine>,
    /// Set when a watched group no longer exists for this user.
    pub closed: bool,
}

/// What a fetch found. `None` in [`ConversationPoller::apply`] means the
/// conversation is gone.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub lines: Vec<ChatLine>,
    /// Messages to this user not yet marked read.
    pub unread: Vec<MessageId>,
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub notified: bool,
    pub count: usize,
    /// The result arrived after the poller was stopped and was dropped.
    pub discarded: bool,
    /// Background read-receipt task, if any were due.
    pub receipts: Option<JoinHandle<()>>,
}

pub struct ConversationPoller {
    me: UserId,
    target: ConversationTarget,
    feed: Arc<dyn MessageFeed>,
    chime: Arc<dyn Chime>,
    previous_count: Option<usize>,
    view: watch::Sender<ConversationView>,
    liveness: Liveness,
}

impl ConversationPoller {
    pub fn new(
        me: UserId,
        target: ConversationTarget,
        feed: Arc<dyn MessageFeed>,
        chime: Arc<dyn Chime>,
    ) -> Self {
        let (view, _) = watch::channel(ConversationView::default());
        Self {
            me,
            target,
            feed,
            chime,
            previous_count: None,
            view,
            liveness: Liveness::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view.subscribe()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn target(&self) -> &ConversationTarget {
        &self.target
    }

    /// Fetch once and apply the result.
    pub async fn poll_once(&mut self) -> Result<TickOutcome, ClientError> {
        let snapshot = self.fetch().await?;
        Ok(self.apply(snapshot))
    }

    async fn fetch(&self) -> Result<Option<Snapshot>, ClientError> {
        match &self.target {
            ConversationTarget::Direct(peer) => {
                let messages = self.feed.direct_messages(&self.me).await?;

                let mut unread = Vec::new();
                let mut lines = Vec::new();
                for message in messages.into_iter().filter(|m| m.is_between(&self.me, peer)) {
                    if message.to == self.me && !message.read {
                        unread.push(message.id);
                    }
                    lines.push(ChatLine::from(message));
                }
                lines.sort_by_key(|line| line.sent_at);

                Ok(Some(Snapshot { lines, unread }))
            }
            ConversationTarget::Group(id) => {
                let groups = self.feed.groups_for(&self.me).await?;
                Ok(groups.into_iter().find(|g| g.id == *id).map(|group| {
                    let mut lines: Vec<ChatLine> =
                        group.messages.into_iter().map(ChatLine::from).collect();
                    lines.sort_by_key(|line| line.sent_at);
                    Snapshot {
                        lines,
                        unread: Vec::new(),
                    }
                }))
            }
        }
    }

    /// Apply a fetched snapshot: diff, notify, send receipts, publish.
    pub fn apply(&mut self, snapshot: Option<Snapshot>) -> TickOutcome {
        if !self.liveness.is_alive() {
            debug!("Conversation closed, dropping late poll result");
            return TickOutcome {
                discarded: true,
                ..TickOutcome::default()
            };
        }

        let Some(snapshot) = snapshot else {
            info!(target = ?self.target, "Conversation no longer available");
            self.view.send_replace(ConversationView {
                lines: Vec::new(),
                closed: true,
            });
            self.previous_count = Some(0);
            return TickOutcome::default();
        };

        let count = snapshot.lines.len();
        let notified = match self.previous_count {
            Some(previous) if count > previous => snapshot
                .lines
                .last()
                .is_some_and(|line| line.from != self.me),
            _ => false,
        };
        if notified {
            debug!(count, "New message in conversation");
            self.chime.play();
        }

        let receipts = (!snapshot.unread.is_empty()).then(|| {
            let feed = self.feed.clone();
            let me = self.me.clone();
            let ids = snapshot.unread;
            tokio::spawn(async move {
                for id in ids {
                    if let Err(e) = feed.mark_read(id, &me).await {
                        debug!(message = %id, error = %e, "Read receipt failed");
                    }
                }
            })
        });

        self.view.send_replace(ConversationView {
            lines: snapshot.lines,
            closed: false,
        });
        self.previous_count = Some(count);

        TickOutcome {
            notified,
            count,
            discarded: false,
            receipts,
        }
    }

    /// Poll every `period` until the returned handle is stopped or dropped.
    pub fn spawn(self, period: Duration) -> PollHandle {
        let liveness = self.liveness.clone();
        spawn_poll(period, liveness, self)
    }
}

#[async_trait]
impl Tick for ConversationPoller {
    fn name(&self) -> &'static str {
        "conversation"
    }

    async fn tick(&mut self) -> Result<(), ClientError> {
        self.poll_once().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hearth_shared::GroupChat;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeFeed {
        messages: Mutex<Vec<DirectMessage>>,
        groups: Mutex<Vec<GroupChat>>,
        marked: Mutex<Vec<MessageId>>,
        fail_next: AtomicBool,
    }

    impl FakeFeed {
        fn push(&self, from: &str, to: &str, content: &str, minute: u32) -> MessageId {
            let id = MessageId::new();
            self.messages.lock().unwrap().push(DirectMessage {
                id,
                from: user(from),
                to: user(to),
                content: content.into(),
                sent_at: at(minute),
                read: false,
            });
            id
        }
    }

    #[async_trait]
    impl MessageFeed for FakeFeed {
        async fn direct_messages(&self, who: &UserId) -> Result<Vec<DirectMessage>, ClientError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ClientError::Server {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| &m.from == who || &m.to == who)
                .cloned()
                .collect())
        }

        async fn groups_for(&self, who: &UserId) -> Result<Vec<GroupChat>, ClientError> {
            Ok(self
                .groups
                .lock()
                .unwrap()
                .iter()
                .filter(|g| g.is_member(who))
                .cloned()
                .collect())
        }

        async fn mark_read(&self, id: MessageId, _reader: &UserId) -> Result<(), ClientError> {
            self.marked.lock().unwrap().push(id);
            for m in self.messages.lock().unwrap().iter_mut() {
                if m.id == id {
                    m.read = true;
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingChime(AtomicUsize);

    impl Chime for RecordingChime {
        fn play(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 18, minute, 0).unwrap()
    }

    fn direct(feed: &Arc<FakeFeed>, chime: &Arc<RecordingChime>) -> ConversationPoller {
        ConversationPoller::new(
            user("mom"),
            ConversationTarget::Direct(user("kid")),
            feed.clone(),
            chime.clone(),
        )
    }

    #[tokio::test]
    async fn first_tick_sets_baseline_without_chime() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        feed.push("kid", "mom", "hi", 1);
        feed.push("mom", "kid", "hello", 2);

        let mut poller = direct(&feed, &chime);
        let outcome = poller.poll_once().await.unwrap();

        assert!(!outcome.notified);
        assert_eq!(outcome.count, 2);
        assert_eq!(chime.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn new_inbound_message_chimes_exactly_once() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        let mut poller = direct(&feed, &chime);

        poller.poll_once().await.unwrap();
        feed.push("kid", "mom", "can I have a snack?", 3);

        assert!(poller.poll_once().await.unwrap().notified);
        assert!(!poller.poll_once().await.unwrap().notified);
        assert!(!poller.poll_once().await.unwrap().notified);
        assert_eq!(chime.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn own_messages_do_not_chime() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        let mut poller = direct(&feed, &chime);

        poller.poll_once().await.unwrap();
        feed.push("mom", "kid", "dinner is ready", 4);

        let outcome = poller.poll_once().await.unwrap();
        assert!(!outcome.notified);
        assert_eq!(outcome.count, 1);
        assert_eq!(chime.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn view_is_filtered_and_sorted() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        feed.push("kid", "mom", "second", 10);
        feed.push("dad", "mom", "not in this chat", 5);
        feed.push("mom", "kid", "first", 2);
        feed.push("kid", "dad", "also not here", 1);

        let mut poller = direct(&feed, &chime);
        let view = poller.subscribe();
        poller.poll_once().await.unwrap();

        let lines: Vec<String> = view.borrow().lines.iter().map(|l| l.content.clone()).collect();
        assert_eq!(lines, vec!["first", "second"]);
        assert!(!view.borrow().closed);
    }

    #[tokio::test]
    async fn unread_inbound_messages_are_marked_read() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        let inbound = feed.push("kid", "mom", "hi", 1);
        feed.push("mom", "kid", "hey", 2);

        let mut poller = direct(&feed, &chime);
        let outcome = poller.poll_once().await.unwrap();
        outcome.receipts.expect("receipts due").await.unwrap();
        assert_eq!(*feed.marked.lock().unwrap(), vec![inbound]);

        // Already read on the next tick, so nothing is sent again.
        let outcome = poller.poll_once().await.unwrap();
        assert!(outcome.receipts.is_none());
    }

    #[tokio::test]
    async fn stopped_poller_discards_late_results() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        let mut poller = direct(&feed, &chime);
        let view = poller.subscribe();
        poller.poll_once().await.unwrap();

        feed.push("kid", "mom", "are you there?", 6);
        poller.liveness().stop();

        let outcome = poller.poll_once().await.unwrap();
        assert!(outcome.discarded);
        assert!(outcome.receipts.is_none());
        assert!(view.borrow().lines.is_empty());
        assert_eq!(chime.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_view_alone() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        feed.push("kid", "mom", "hi", 1);

        let mut poller = direct(&feed, &chime);
        let view = poller.subscribe();
        poller.poll_once().await.unwrap();

        feed.fail_next.store(true, Ordering::SeqCst);
        assert!(matches!(
            poller.poll_once().await,
            Err(ClientError::Server { status: 503, .. })
        ));
        assert_eq!(view.borrow().lines.len(), 1);
    }

    #[tokio::test]
    async fn spawned_loop_recovers_after_errors() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        feed.fail_next.store(true, Ordering::SeqCst);
        feed.push("kid", "mom", "hi", 1);

        let poller = direct(&feed, &chime);
        let mut view = poller.subscribe();
        let handle = poller.spawn(Duration::from_millis(5));

        tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.lines.len() == 1))
            .await
            .expect("view updated")
            .unwrap();
        handle.join().await;
    }

    #[tokio::test]
    async fn group_view_and_dissolution() {
        let feed = Arc::new(FakeFeed::default());
        let chime = Arc::new(RecordingChime::default());
        let id = GroupId::new();
        feed.groups.lock().unwrap().push(GroupChat {
            id,
            name: "Family".into(),
            members: vec![user("mom"), user("dad"), user("kid")],
            created_by: user("mom"),
            created_at: at(0),
            messages: vec![GroupMessage {
                from: user("dad"),
                content: "pizza tonight".into(),
                sent_at: at(1),
            }],
        });

        let mut poller = ConversationPoller::new(
            user("kid"),
            ConversationTarget::Group(id),
            feed.clone(),
            chime.clone(),
        );
        let view = poller.subscribe();
        poller.poll_once().await.unwrap();
        assert_eq!(view.borrow().lines[0].content, "pizza tonight");

        feed.groups.lock().unwrap()[0].messages.push(GroupMessage {
            from: user("mom"),
            content: "yes!".into(),
            sent_at: at(2),
        });
        assert!(poller.poll_once().await.unwrap().notified);

        feed.groups.lock().unwrap().clear();
        poller.poll_once().await.unwrap();
        assert!(view.borrow().closed);
        assert!(view.borrow().lines.is_empty());
    }
}
