use std::collections::BTreeMap;
use std::os::unix::io::RawFd;

use nix::poll::PollFlags;

/// The descriptors monitored by the event loop, with the conditions each one is monitored for.
///
/// An entry exists exactly as long as the handle that owns the descriptor is open.
/// Iteration is in ascending descriptor order.
#[derive(Debug, Default)]
pub struct Registry {
	entries: BTreeMap<RawFd, PollFlags>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a descriptor, replacing any previous interest for it.
	pub fn register(&mut self, fd: RawFd, interest: PollFlags) {
		if let Some(previous) = self.entries.insert(fd, interest) {
			warn!("fd {} was already registered with {:?}", fd, previous);
		}
	}

	/// Remove a descriptor, returning `true` if it was registered.
	pub fn deregister(&mut self, fd: RawFd) -> bool {
		self.entries.remove(&fd).is_some()
	}

	pub fn contains(&self, fd: RawFd) -> bool {
		self.entries.contains_key(&fd)
	}

	pub fn interest(&self, fd: RawFd) -> Option<PollFlags> {
		self.entries.get(&fd).copied()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (RawFd, PollFlags)> + '_ {
		self.entries.iter().map(|(&fd, &interest)| (fd, interest))
	}
}
