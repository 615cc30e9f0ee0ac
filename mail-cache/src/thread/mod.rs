//! Module dedicated to message threading.
//!
//! This module implements the JWZ threading algorithm (see
//! <https://www.jwz.org/doc/threading.html>): messages are linked
//! together using their Message-ID, References and In-Reply-To
//! headers, missing ancestors are represented by placeholders, and
//! roots left without headers are gathered by subject.
//!
//! The algorithm is deterministic: messages are processed by date,
//! then by Message-ID, then by References and subject, so the same
//! batch gives the same forest whatever its order.

mod container;
mod subject;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, instrument, trace};

#[doc(inline)]
pub use self::{
    container::{ContainerId, Forest, ThreadAnomaly, ThreadNode},
    subject::{has_reply_prefix, normalize_subject},
};
use self::container::Container;
use crate::{config::ThreadConfig, record::CacheRecord};

/// A message that can be threaded.
pub trait Threadable {
    /// The Message-ID header, `None` when missing.
    fn message_id(&self) -> Option<String>;

    /// The message ids of the References header, oldest first.
    fn references(&self) -> Vec<String>;

    /// The first message id of the In-Reply-To header. It is only
    /// used when the References header is empty.
    fn in_reply_to(&self) -> Option<String>;

    fn subject(&self) -> String;

    /// Seconds since the Unix epoch.
    fn date(&self) -> u64;
}

impl Threadable for CacheRecord {
    fn message_id(&self) -> Option<String> {
        parse_message_ids(&self.message_id).into_iter().next()
    }

    fn references(&self) -> Vec<String> {
        parse_message_ids(&self.references)
    }

    fn in_reply_to(&self) -> Option<String> {
        parse_message_ids(&self.in_reply_to).into_iter().next()
    }

    fn subject(&self) -> String {
        String::from_utf8_lossy(&self.subject).into_owned()
    }

    fn date(&self) -> u64 {
        self.date
    }
}

/// Extract message ids from a raw header value.
///
/// Message ids are expected between angle brackets. Headers without
/// any bracketed id are split on whitespaces instead.
pub fn parse_message_ids(raw: &[u8]) -> Vec<String> {
    let raw = String::from_utf8_lossy(raw);
    let mut ids = Vec::new();
    let mut rest: &str = &raw;

    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };

        let id = &rest[start..=start + len];
        if id.len() > 2 {
            ids.push(id.to_owned());
        }

        rest = &rest[start + len + 1..];
    }

    if ids.is_empty() {
        ids = raw.split_whitespace().map(ToOwned::to_owned).collect();
    }

    ids
}

/// Thread the given messages using the default configuration.
pub fn thread<T: Threadable>(messages: &[T]) -> Forest {
    thread_with_config(messages, &ThreadConfig::default())
}

/// Thread the given messages.
///
/// Nodes of the returned forest refer to messages by their index in
/// the given slice.
#[instrument(skip_all, fields(messages = messages.len()))]
pub fn thread_with_config<T: Threadable>(messages: &[T], config: &ThreadConfig) -> Forest {
    let headers: Vec<Headers> = messages.iter().map(Headers::from_message).collect();
    let mut threader = Threader::new(&headers);

    for index in threader.order.clone() {
        threader.register(index);
        threader.link_references(index);
    }

    threader.collect_roots();
    threader.prune();

    if config.is_subject_gathering_enabled() {
        threader.gather_subjects();
    }

    threader.sort();

    let forest = threader.forest;
    debug!(
        roots = forest.len(),
        anomalies = forest.anomalies().len(),
        "messages threaded"
    );
    forest
}

/// The headers of a message needed by the threading.
struct Headers {
    message_id: Option<String>,
    /// The References ids, or the In-Reply-To id when References is
    /// empty.
    references: Vec<String>,
    subject: String,
    date: u64,
}

impl Headers {
    fn from_message<T: Threadable>(message: &T) -> Self {
        let mut references = message.references();
        if references.is_empty() {
            references.extend(message.in_reply_to());
        }

        Self {
            message_id: message.message_id().filter(|id| !id.is_empty()),
            references,
            subject: message.subject(),
            date: message.date(),
        }
    }
}

type SortKey = (u64, String, usize);

struct Threader<'a> {
    headers: &'a [Headers],
    /// Message indexes, in processing order.
    order: Vec<usize>,
    /// Position of every message inside `order`.
    ranks: Vec<usize>,
    forest: Forest,
    table: HashMap<&'a str, ContainerId>,
    /// Container of every message, `None` for duplicates.
    containers: Vec<Option<ContainerId>>,
}

impl<'a> Threader<'a> {
    fn new(headers: &'a [Headers]) -> Self {
        let mut order: Vec<usize> = (0..headers.len()).collect();
        order.sort_by(|a, b| {
            let (ha, hb) = (&headers[*a], &headers[*b]);
            (ha.date, &ha.message_id, &ha.references, &ha.subject, a).cmp(&(
                hb.date,
                &hb.message_id,
                &hb.references,
                &hb.subject,
                b,
            ))
        });

        let mut ranks = vec![0; headers.len()];
        for (rank, index) in order.iter().enumerate() {
            ranks[*index] = rank;
        }

        Self {
            headers,
            order,
            ranks,
            forest: Forest::default(),
            table: HashMap::new(),
            containers: vec![None; headers.len()],
        }
    }

    /// Give the message its own container.
    fn register(&mut self, index: usize) {
        let headers = self.headers;
        let headers = &headers[index];

        let Some(message_id) = headers.message_id.as_deref() else {
            let id = self.forest.push(Container {
                message: Some(index),
                ..Default::default()
            });
            self.containers[index] = Some(id);
            return;
        };

        match self.table.get(message_id).copied() {
            Some(id) if self.forest.get(id).message.is_some() => {
                debug!(message_id, index, "duplicate message id, skipping message");
                self.forest
                    .anomalies
                    .push(ThreadAnomaly::DuplicateIdentifier {
                        message: index,
                        message_id: message_id.to_owned(),
                    });
            }
            Some(id) => {
                self.forest.get_mut(id).message = Some(index);
                self.containers[index] = Some(id);
            }
            None => {
                let id = self.forest.push(Container {
                    message: Some(index),
                    message_id: Some(message_id.to_owned()),
                    ..Default::default()
                });
                self.table.insert(message_id, id);
                self.containers[index] = Some(id);
            }
        }
    }

    /// Link the references of the message together, then link the
    /// message under its last reference.
    fn link_references(&mut self, index: usize) {
        let Some(own) = self.containers[index] else {
            return;
        };

        let headers = self.headers;
        let mut prev = None;

        for reference in &headers[index].references {
            let id = self.get_or_create_placeholder(reference);

            if let Some(parent) = prev {
                // existing links are kept
                if self.forest.get(id).parent.is_none() {
                    self.try_link(parent, id);
                }
            }

            prev = Some(id);
        }

        let Some(parent) = prev else {
            return;
        };

        if self.forest.get(own).parent == Some(parent) {
            return;
        }

        if self.would_cycle(parent, own) {
            return;
        }

        self.forest.unlink(own);
        self.forest.link(parent, own);
    }

    fn get_or_create_placeholder(&mut self, message_id: &'a str) -> ContainerId {
        if let Some(id) = self.table.get(message_id) {
            return *id;
        }

        let id = self.forest.push(Container {
            message_id: Some(message_id.to_owned()),
            ..Default::default()
        });
        self.table.insert(message_id, id);
        id
    }

    fn try_link(&mut self, parent: ContainerId, child: ContainerId) {
        if !self.would_cycle(parent, child) {
            self.forest.link(parent, child);
        }
    }

    fn would_cycle(&mut self, parent: ContainerId, child: ContainerId) -> bool {
        if !self.forest.is_ancestor(child, parent) {
            return false;
        }

        let parent = self.forest.get(parent).message_id.clone();
        let child = self.forest.get(child).message_id.clone();
        debug!(?parent, ?child, "link would create a cycle, skipping it");
        self.forest
            .anomalies
            .push(ThreadAnomaly::CycleDetected { parent, child });

        true
    }

    fn collect_roots(&mut self) {
        self.forest.roots = (0..self.forest.containers.len())
            .map(ContainerId)
            .filter(|id| self.forest.get(*id).parent.is_none())
            .collect();
        trace!(roots = self.forest.roots.len(), "roots collected");
    }

    /// Return all containers reachable from the roots, descendants
    /// first.
    fn post_order(&self) -> Vec<ContainerId> {
        let mut order = Vec::with_capacity(self.forest.containers.len());
        let mut stack = self.forest.roots.clone();

        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.forest.child_ids(id));
        }

        order.reverse();
        order
    }

    /// Remove empty placeholders and replace placeholders having a
    /// single child by that child.
    fn prune(&mut self) {
        for id in self.post_order() {
            let children = self.forest.child_ids(id);
            let children = self.prune_siblings(children);
            self.forest.set_children(id, &children);
        }

        let roots = std::mem::take(&mut self.forest.roots);
        let roots = self.prune_siblings(roots);
        for root in &roots {
            let container = self.forest.get_mut(*root);
            container.parent = None;
            container.next_sibling = None;
        }
        self.forest.roots = roots;
    }

    fn prune_siblings(&mut self, ids: Vec<ContainerId>) -> Vec<ContainerId> {
        let mut kept = Vec::with_capacity(ids.len());

        for id in ids {
            if self.forest.get(id).message.is_some() {
                kept.push(id);
                continue;
            }

            match self.forest.child_ids(id).as_slice() {
                [] => (),
                [child] => kept.push(*child),
                _ => {
                    kept.push(id);
                    continue;
                }
            }

            let placeholder = self.forest.get_mut(id);
            placeholder.parent = None;
            placeholder.first_child = None;
            placeholder.next_sibling = None;
        }

        kept
    }

    /// Gather roots without references sharing the same normalized
    /// subject under the earliest of them.
    fn gather_subjects(&mut self) {
        let mut groups: BTreeMap<String, Vec<ContainerId>> = BTreeMap::new();

        for root in &self.forest.roots {
            let Some(index) = self.forest.get(*root).message else {
                continue;
            };

            let headers = &self.headers[index];
            if !headers.references.is_empty() {
                continue;
            }

            let subject = normalize_subject(&headers.subject);
            if subject.is_empty() {
                continue;
            }

            groups.entry(subject).or_default().push(*root);
        }

        let mut gathered = HashSet::new();

        for (subject, roots) in groups {
            if roots.len() < 2 {
                continue;
            }

            let Some(parent) = roots.iter().copied().min_by_key(|id| self.key(*id, None)) else {
                continue;
            };

            trace!(subject, roots = roots.len(), "gathering roots by subject");

            let mut children = self.forest.child_ids(parent);
            for root in roots.into_iter().filter(|root| *root != parent) {
                children.push(root);
                gathered.insert(root);
            }
            self.forest.set_children(parent, &children);
        }

        self.forest.roots.retain(|root| !gathered.contains(root));
    }

    /// Sort roots and children by date, then by Message-ID.
    fn sort(&mut self) {
        let mut keys: Vec<Option<SortKey>> = vec![None; self.forest.containers.len()];

        for id in self.post_order() {
            let mut children = self.forest.child_ids(id);
            children.sort_by(|a, b| keys[a.0].cmp(&keys[b.0]));
            self.forest.set_children(id, &children);

            let first_child_date = children
                .first()
                .and_then(|child| keys[child.0].as_ref())
                .map(|key| key.0);
            keys[id.0] = Some(self.key(id, first_child_date));
        }

        self.forest
            .roots
            .sort_by(|a, b| keys[a.0].cmp(&keys[b.0]));
    }

    /// Return the sort key of the given container. Placeholders take
    /// the date of their earliest child.
    fn key(&self, id: ContainerId, first_child_date: Option<u64>) -> SortKey {
        let container = self.forest.get(id);

        match container.message {
            Some(index) => {
                let headers = &self.headers[index];
                let message_id = headers.message_id.clone().unwrap_or_default();
                (headers.date, message_id, self.ranks[index])
            }
            None => {
                let date = first_child_date.unwrap_or(u64::MAX);
                let message_id = container.message_id.clone().unwrap_or_default();
                (date, message_id, usize::MAX)
            }
        }
    }
}
