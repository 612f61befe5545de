use std::num::NonZeroU32;

use crate::Error;

/// A non-zero handle handed to C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(NonZeroU32);

impl TryFrom<i32> for Id {
	type Error = Error;

	fn try_from(value: i32) -> Result<Self, Self::Error> {
		u32::try_from(value)
			.ok()
			.and_then(NonZeroU32::new)
			.map(Self)
			.ok_or(Error::InvalidId)
	}
}

impl TryFrom<Id> for i32 {
	type Error = std::num::TryFromIntError;

	fn try_from(id: Id) -> Result<Self, Self::Error> {
		i32::try_from(id.0.get())
	}
}

impl Id {
	fn index(&self) -> usize {
		self.0.get() as usize - 1
	}
}

/// A slab whose keys are never zero, so zero can mean "none" over FFI.
pub struct NonZeroSlab<T>(slab::Slab<T>);

impl<T> NonZeroSlab<T> {
	pub fn insert(&mut self, value: T) -> Result<Id, Error> {
		let entry = self.0.vacant_entry();
		let id = u32::try_from(entry.key() + 1)
			.ok()
			.filter(|id| *id <= i32::MAX as u32)
			.and_then(NonZeroU32::new)
			.ok_or(Error::InvalidCode)?;

		entry.insert(value);
		Ok(Id(id))
	}

	pub fn get(&self, id: Id) -> Option<&T> {
		self.0.get(id.index())
	}

	pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
		self.0.get_mut(id.index())
	}

	pub fn remove(&mut self, id: Id) -> Option<T> {
		self.0.try_remove(id.index())
	}
}

impl<T> Default for NonZeroSlab<T> {
	fn default() -> Self {
		Self(slab::Slab::new())
	}
}
