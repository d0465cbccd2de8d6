//! Path-addressed request/response bus between modules.
//!
//! Runtime units (RTP senders, the RTSP server, the display) each own a
//! [`Module`] node registered under a parent. A control-plane unit reaches a
//! data-plane unit by walking class tags down from a common ancestor:
//!
//! ```text
//! root
//! ├── sender            ← video RTP sender   (path "sender")
//! ├── audio
//! │   └── sender        ← audio RTP sender   (path "audio.sender")
//! └── display
//! ```
//!
//! Delivery is synchronous for the caller: [`send_message`] enqueues the
//! message into the target's private mailbox and blocks until the target's
//! owner answers it (or a bounded wait elapses). The owner handles its
//! mailbox one message at a time, in enqueue order, either from its own
//! thread via [`Module::mailbox`] or from a wake-up callback installed with
//! [`Module::set_notifier`] and [`Module::check_message`].
//!
//! Nodes hold only a weak link to their parent. Dropping a [`Module`]
//! unregisters it and answers every pending message with `404`.

mod bus;
mod message;
mod path;

pub use bus::{DEFAULT_RESPONSE_TIMEOUT, send_message, send_message_timeout};
pub use message::{
    Envelope, MAX_RECEIVER_LEN, Message, ReceiverName, Response, ResponseStatus, SenderMessage,
};
pub use path::{MessagePath, ModuleClass};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

type Notifier = Box<dyn Fn() + Send + Sync>;

pub(crate) struct Node {
    class: ModuleClass,
    parent: Weak<Node>,
    children: RwLock<Vec<Arc<Node>>>,
    inbox_tx: Sender<Envelope>,
    inbox_rx: Receiver<Envelope>,
    notifier: RwLock<Option<Notifier>>,
    closed: AtomicBool,
}

impl Node {
    fn new(class: ModuleClass, parent: Weak<Node>) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            class,
            parent,
            children: RwLock::new(Vec::new()),
            inbox_tx,
            inbox_rx,
            notifier: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// First child (registration order) per level.
    fn resolve(self: &Arc<Self>, path: &MessagePath) -> Option<Arc<Node>> {
        let mut current = self.clone();
        for class in path.segments() {
            let next = current
                .children
                .read()
                .iter()
                .find(|child| child.class == *class)
                .cloned()?;
            current = next;
        }
        Some(current)
    }

    pub(crate) fn deliver(&self, envelope: Envelope) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.inbox_tx.send(envelope).is_err() {
            return false;
        }
        if let Some(notify) = self.notifier.read().as_ref() {
            notify();
        }
        true
    }
}

/// Owning handle of a module tree node.
///
/// Not cloneable: the owner is the unit that handles the node's mailbox.
/// Use [`handle`](Self::handle) to hand out references for sending.
pub struct Module {
    node: Arc<Node>,
}

impl Module {
    /// Create a parentless root node.
    pub fn root() -> Self {
        Self {
            node: Node::new(ModuleClass::Root, Weak::new()),
        }
    }

    /// Create a node and register it as the last child of `parent`.
    pub fn new(class: ModuleClass, parent: &ModuleRef) -> Self {
        let node = Node::new(class, Arc::downgrade(&parent.node));
        parent.node.children.write().push(node.clone());
        tracing::debug!(%class, parent = %parent.class(), "module registered");
        Self { node }
    }

    pub fn class(&self) -> ModuleClass {
        self.node.class
    }

    pub fn handle(&self) -> ModuleRef {
        ModuleRef {
            node: self.node.clone(),
        }
    }

    /// Pop the next pending message without blocking.
    pub fn check_message(&self) -> Option<Envelope> {
        self.node.inbox_rx.try_recv().ok()
    }

    /// Mailbox receiver, for owners that `select!` over it on their own thread.
    pub fn mailbox(&self) -> Receiver<Envelope> {
        self.node.inbox_rx.clone()
    }

    /// Install the hook invoked after every enqueue (e.g. to wake an event loop).
    pub fn set_notifier(&self, notify: impl Fn() + Send + Sync + 'static) {
        *self.node.notifier.write() = Some(Box::new(notify));
    }

    /// Number of messages waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.node.inbox_rx.len()
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        self.node.closed.store(true, Ordering::SeqCst);
        *self.node.notifier.write() = None;

        if let Some(parent) = self.node.parent.upgrade() {
            parent
                .children
                .write()
                .retain(|child| !Arc::ptr_eq(child, &self.node));
        }

        let mut rejected = 0usize;
        while let Ok(envelope) = self.node.inbox_rx.try_recv() {
            envelope.respond(Response::not_found("module destroyed"));
            rejected += 1;
        }
        tracing::debug!(class = %self.node.class, rejected, "module unregistered");
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("class", &self.node.class)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Cloneable, non-owning reference to a module node, used as the starting
/// point of a [`send_message`] route.
#[derive(Clone)]
pub struct ModuleRef {
    node: Arc<Node>,
}

impl ModuleRef {
    pub fn class(&self) -> ModuleClass {
        self.node.class
    }

    /// Walk weak parent links up to the topmost live ancestor.
    pub fn root(&self) -> ModuleRef {
        let mut current = self.node.clone();
        while let Some(parent) = current.parent.upgrade() {
            current = parent;
        }
        ModuleRef { node: current }
    }

    /// Whether `path` currently resolves to a node below this one.
    pub fn resolves(&self, path: &MessagePath) -> bool {
        self.node.resolve(path).is_some()
    }

    pub(crate) fn resolve(&self, path: &MessagePath) -> Option<Arc<Node>> {
        self.node.resolve(path)
    }

    pub fn child_count(&self) -> usize {
        self.node.children.read().len()
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("class", &self.node.class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_per_level() {
        let root = Module::root();
        let first = Module::new(ModuleClass::Sender, &root.handle());
        let _second = Module::new(ModuleClass::Sender, &root.handle());

        let target = root
            .handle()
            .resolve(&MessagePath::new([ModuleClass::Sender]))
            .unwrap();
        assert!(Arc::ptr_eq(&target, &first.node));
    }

    #[test]
    fn drop_unregisters_from_parent() {
        let root = Module::root();
        let child = Module::new(ModuleClass::Display, &root.handle());
        assert_eq!(root.handle().child_count(), 1);
        drop(child);
        assert_eq!(root.handle().child_count(), 0);
    }

    #[test]
    fn root_walks_weak_parents() {
        let root = Module::root();
        let audio = Module::new(ModuleClass::Audio, &root.handle());
        let sender = Module::new(ModuleClass::Sender, &audio.handle());
        assert_eq!(sender.handle().root().class(), ModuleClass::Root);
    }

    #[test]
    fn drop_rejects_pending_messages() {
        let root = Module::root();
        let child = Module::new(ModuleClass::Sender, &root.handle());
        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(child.node.deliver(Envelope::new(Message::Text("x".into()), tx)));
        drop(child);
        assert_eq!(rx.try_recv().unwrap().status, ResponseStatus::NotFound);
    }
}
