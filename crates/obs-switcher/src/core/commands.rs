use crate::messages::OP_REQUEST;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const LEVELS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Low = 0,
	#[default]
	Normal = 1,
	High = 2,
	Critical = 3,
}

impl Priority {
	/// Highest first, the order the daemon drains in
	pub const DRAIN_ORDER: [Self; LEVELS] = [Self::Critical, Self::High, Self::Normal, Self::Low];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Low => "low",
			Self::Normal => "normal",
			Self::High => "high",
			Self::Critical => "critical",
		}
	}

	const fn index(self) -> usize {
		self as usize
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown priority '{0}', expected low, normal, high or critical")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
	type Err = ParsePriorityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"low" => Ok(Self::Low),
			"normal" => Ok(Self::Normal),
			"high" => Ok(Self::High),
			"critical" => Ok(Self::Critical),
			_ => Err(ParsePriorityError(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CommandKind {
	SwitchScene { scene_name: String },
}

/// One pending request, owned by the queue until the daemon drains it
#[derive(Debug, Clone)]
pub struct Command {
	pub kind: CommandKind,
	pub priority: Priority,
	pub request_id: String,
	pub created_at: Instant,
}

impl Command {
	pub fn switch_scene(scene_name: impl Into<String>, priority: Priority) -> Self {
		Self {
			kind: CommandKind::SwitchScene { scene_name: scene_name.into() },
			priority,
			request_id: Uuid::new_v4().to_string(),
			created_at: Instant::now(),
		}
	}

	pub fn age(&self) -> Duration {
		self.created_at.elapsed()
	}

	/// Time spent queued since `since`, or since creation if that was later
	pub fn age_since(&self, since: Instant) -> Duration {
		self.created_at.max(since).elapsed()
	}

	/// Request envelope sent to the server
	pub fn to_request(&self) -> Value {
		match &self.kind {
			CommandKind::SwitchScene { scene_name } => json!({
				"op": OP_REQUEST,
				"d": {
					"requestType": "SetCurrentProgramScene",
					"requestId": self.request_id,
					"requestData": {
						"sceneName": scene_name,
					},
				},
			}),
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
	#[error("Command queue full ({capacity} commands pending)")]
	Full { capacity: usize },

	#[error("Command queue closed")]
	Closed,
}

#[derive(Debug, Default)]
struct Levels {
	pending: [VecDeque<Command>; LEVELS],
	len: usize,
	closed: bool,
	/// Set by `wake`, consumed by the next `wait_closed`
	woken: bool,
}

/// Bounded four-level priority queue shared between producers and the daemon.
///
/// FIFO within a level; a higher level always drains before any lower one.
#[derive(Debug)]
pub struct CommandQueue {
	levels: Mutex<Levels>,
	signal: Condvar,
	capacity: usize,
}

impl CommandQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			levels: Mutex::new(Levels::default()),
			signal: Condvar::new(),
			capacity,
		}
	}

	fn lock(&self) -> MutexGuard<'_, Levels> {
		self.levels.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub const fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.lock().len
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_closed(&self) -> bool {
		self.lock().closed
	}

	pub fn push(&self, command: Command) -> Result<(), QueueError> {
		let mut levels = self.lock();
		if levels.closed {
			return Err(QueueError::Closed);
		}
		if levels.len >= self.capacity {
			return Err(QueueError::Full { capacity: self.capacity });
		}

		levels.pending[command.priority.index()].push_back(command);
		levels.len += 1;
		drop(levels);

		self.signal.notify_all();
		Ok(())
	}

	/// Take the oldest command of the highest non-empty level
	pub fn pop_next(&self) -> Option<Command> {
		let mut levels = self.lock();
		for priority in Priority::DRAIN_ORDER {
			if let Some(command) = levels.pending[priority.index()].pop_front() {
				levels.len -= 1;
				return Some(command);
			}
		}
		None
	}

	/// Reject further pushes, wake every waiter and hand back what was still queued
	pub fn close(&self) -> Vec<Command> {
		let mut levels = self.lock();
		levels.closed = true;
		levels.len = 0;
		let remaining = Priority::DRAIN_ORDER.iter().flat_map(|p| std::mem::take(&mut levels.pending[p.index()])).collect();
		drop(levels);

		self.signal.notify_all();
		remaining
	}

	/// Cut short the current or next `wait_closed`
	pub fn wake(&self) {
		self.lock().woken = true;
		self.signal.notify_all();
	}

	/// Sleep up to `timeout`, returning early on `wake` or close. Returns `true` once the queue is closed.
	pub fn wait_closed(&self, timeout: Duration) -> bool {
		let levels = self.lock();
		let (mut levels, _) = self
			.signal
			.wait_timeout_while(levels, timeout, |levels| !levels.closed && !levels.woken)
			.unwrap_or_else(PoisonError::into_inner);
		levels.woken = false;
		levels.closed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	fn scene(command: &Command) -> &str {
		match &command.kind {
			CommandKind::SwitchScene { scene_name } => scene_name,
		}
	}

	#[test]
	fn test_priority_parse_and_display() {
		assert_eq!("critical".parse::<Priority>(), Ok(Priority::Critical));
		assert_eq!(" High ".parse::<Priority>(), Ok(Priority::High));
		assert!("urgent".parse::<Priority>().is_err());
		assert_eq!(Priority::Low.to_string(), "low");
		assert_eq!(Priority::default(), Priority::Normal);
	}

	#[test]
	fn test_request_envelope() {
		let command = Command::switch_scene("Live", Priority::Normal);
		let request = command.to_request();

		assert_eq!(request["op"], 6);
		assert_eq!(request["d"]["requestType"], "SetCurrentProgramScene");
		assert_eq!(request["d"]["requestId"], command.request_id.as_str());
		assert_eq!(request["d"]["requestData"]["sceneName"], "Live");
	}

	#[test]
	fn test_request_ids_are_unique() {
		let a = Command::switch_scene("A", Priority::Low);
		let b = Command::switch_scene("A", Priority::Low);
		assert_ne!(a.request_id, b.request_id);
		assert!(Uuid::parse_str(&a.request_id).is_ok());
	}

	#[test]
	fn test_strict_priority_then_fifo() {
		let queue = CommandQueue::new(8);
		queue.push(Command::switch_scene("normal-1", Priority::Normal)).unwrap();
		queue.push(Command::switch_scene("low-1", Priority::Low)).unwrap();
		queue.push(Command::switch_scene("normal-2", Priority::Normal)).unwrap();
		queue.push(Command::switch_scene("critical-1", Priority::Critical)).unwrap();
		queue.push(Command::switch_scene("high-1", Priority::High)).unwrap();

		let order: Vec<String> = std::iter::from_fn(|| queue.pop_next()).map(|c| scene(&c).to_string()).collect();
		assert_eq!(order, ["critical-1", "high-1", "normal-1", "normal-2", "low-1"]);
		assert!(queue.is_empty());
	}

	#[test]
	fn test_capacity_counts_all_levels() {
		let queue = CommandQueue::new(2);
		queue.push(Command::switch_scene("a", Priority::Low)).unwrap();
		queue.push(Command::switch_scene("b", Priority::Critical)).unwrap();

		let err = queue.push(Command::switch_scene("c", Priority::Critical)).unwrap_err();
		assert_eq!(err, QueueError::Full { capacity: 2 });
		assert_eq!(queue.len(), 2);

		queue.pop_next();
		assert!(queue.push(Command::switch_scene("c", Priority::Critical)).is_ok());
	}

	#[test]
	fn test_close_rejects_and_returns_pending() {
		let queue = CommandQueue::new(4);
		queue.push(Command::switch_scene("a", Priority::Low)).unwrap();
		queue.push(Command::switch_scene("b", Priority::High)).unwrap();

		let remaining = queue.close();
		assert_eq!(remaining.len(), 2);
		assert_eq!(scene(&remaining[0]), "b");
		assert!(queue.is_empty());
		assert_eq!(queue.push(Command::switch_scene("c", Priority::Low)), Err(QueueError::Closed));
	}

	#[test]
	fn test_wait_closed_times_out_when_open() {
		let queue = CommandQueue::new(1);
		let started = Instant::now();
		assert!(!queue.wait_closed(Duration::from_millis(30)));
		assert!(started.elapsed() >= Duration::from_millis(30));
	}

	#[test]
	fn test_close_wakes_waiter() {
		let queue = Arc::new(CommandQueue::new(1));
		let waiter = {
			let queue = Arc::clone(&queue);
			thread::spawn(move || {
				let started = Instant::now();
				let closed = queue.wait_closed(Duration::from_secs(30));
				(closed, started.elapsed())
			})
		};

		thread::sleep(Duration::from_millis(20));
		queue.close();

		let (closed, waited) = waiter.join().unwrap();
		assert!(closed);
		assert!(waited < Duration::from_secs(5));
	}

	#[test]
	fn test_wake_cuts_wait_short_once() {
		let queue = Arc::new(CommandQueue::new(1));
		let waiter = {
			let queue = Arc::clone(&queue);
			thread::spawn(move || {
				let started = Instant::now();
				let closed = queue.wait_closed(Duration::from_secs(30));
				(closed, started.elapsed())
			})
		};

		thread::sleep(Duration::from_millis(20));
		queue.wake();

		let (closed, waited) = waiter.join().unwrap();
		assert!(!closed);
		assert!(waited < Duration::from_secs(5));

		let started = Instant::now();
		assert!(!queue.wait_closed(Duration::from_millis(30)));
		assert!(started.elapsed() >= Duration::from_millis(30));
	}

	#[test]
	fn test_age_since_counts_from_later_instant() {
		let command = Command::switch_scene("Live", Priority::Normal);
		thread::sleep(Duration::from_millis(30));

		let session = Instant::now();
		assert!(command.age() >= Duration::from_millis(30));
		assert!(command.age_since(session) < Duration::from_millis(30));
		assert!(command.age_since(command.created_at - Duration::from_secs(1)) >= Duration::from_millis(30));
	}
}
