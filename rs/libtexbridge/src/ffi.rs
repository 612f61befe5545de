use std::ffi::{CStr, c_char};

use crate::{Error, Id};

pub fn return_code<C: ReturnCode, F: FnOnce() -> C>(f: F) -> i32 {
	match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
		Ok(ret) => ret.code(),
		Err(_) => Error::Panic.code(),
	}
}

pub trait ReturnCode {
	fn code(&self) -> i32;
}

impl ReturnCode for () {
	fn code(&self) -> i32 {
		0
	}
}

impl ReturnCode for i32 {
	fn code(&self) -> i32 {
		*self
	}
}

impl ReturnCode for Result<i32, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(code) if *code < 0 => Error::InvalidCode.code(),
			Ok(code) => *code,
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<bool, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(value) => *value as i32,
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<Id, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(id) => i32::try_from(*id).unwrap_or_else(|_| Error::InvalidCode.code()),
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<Option<Id>, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(Some(id)) => i32::try_from(*id).unwrap_or_else(|_| Error::InvalidCode.code()),
			Ok(None) => 0,
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<(), Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(()) => 0,
			Err(e) => e.code(),
		}
	}
}

pub fn parse_id(id: i32) -> Result<Id, Error> {
	Id::try_from(id)
}

/// # Safety
///
/// The caller must ensure that cstr is valid for 'a.
pub unsafe fn parse_str<'a>(cstr: *const c_char) -> Result<&'a str, Error> {
	if cstr.is_null() {
		return Ok("");
	}

	let string = unsafe { CStr::from_ptr(cstr) };
	Ok(string.to_str()?)
}

/// # Safety
///
/// The caller must ensure that data is valid for 'a.
pub unsafe fn parse_slice<'a>(data: *const u8, size: usize) -> Result<&'a [u8], Error> {
	if data.is_null() {
		if size == 0 {
			return Ok(&[]);
		}

		return Err(Error::InvalidPointer);
	}

	let data = unsafe { std::slice::from_raw_parts(data, size) };
	Ok(data)
}

/// # Safety
///
/// The caller must ensure that ptr is null or valid for 'a.
pub unsafe fn parse_ref<'a, T>(ptr: *const T) -> Result<&'a T, Error> {
	unsafe { ptr.as_ref() }.ok_or(Error::InvalidPointer)
}

pub fn session_state_code(state: texbridge::SessionState) -> i32 {
	use texbridge::SessionState;

	match state {
		SessionState::Idle => 0,
		SessionState::Preparing => 1,
		SessionState::Playing => 2,
		SessionState::Paused => 3,
		SessionState::Stopped => 4,
		SessionState::Error => 5,
		SessionState::Destroyed => 6,
	}
}

pub fn engine_state_code(state: texbridge::EngineState) -> i32 {
	match state {
		texbridge::EngineState::Loading => 0,
		texbridge::EngineState::Ready => 1,
		texbridge::EngineState::Buffering => 2,
		texbridge::EngineState::Ended => 3,
		_ => -1,
	}
}
