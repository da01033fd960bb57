//! Immutable context chain (component A).
//!
//! A [`Context`] is a persistent singly-linked chain of key/value frames.
//! `derive` never mutates an existing node, so a `Context` can be shared
//! freely across tasks without synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Reserved context keys propagated on every hop of a parse job.
pub const TRACING_ID: &str = "tracing_id";
pub const JOB_ID: &str = "job_id";
pub const REQ_ID: &str = "req_id";
pub const STORE_ID: &str = "store_id";
pub const TARGET_TYPES: &str = "target_types";
pub const INDEX: &str = "index";

/// The five identifiers re-injected into every yielded context override.
pub const RESERVED_IDS: [&str; 4] = [TRACING_ID, JOB_ID, REQ_ID, STORE_ID];

struct Frame {
	parent: Option<Context>,
	key: String,
	value: String,
}

/// Cheap-to-clone handle to an immutable context frame.
#[derive(Clone)]
pub struct Context(Arc<FrameNode>);

struct FrameNode {
	frame: Option<Frame>,
	flattened: OnceCell<HashMap<String, String>>,
}

impl Context {
	/// The empty context — equivalent to a nil parent.
	pub fn root() -> Context {
		Context(Arc::new(FrameNode {
			frame: None,
			flattened: OnceCell::new(),
		}))
	}

	/// Returns a new context layering `key -> value` on top of `self`.
	pub fn derive(&self, key: impl Into<String>, value: impl Into<String>) -> Context {
		Context(Arc::new(FrameNode {
			frame: Some(Frame {
				parent: Some(self.clone()),
				key: key.into(),
				value: value.into(),
			}),
			flattened: OnceCell::new(),
		}))
	}

	/// Looks up the nearest value for `key`, walking parent-ward.
	pub fn get(&self, key: &str) -> String {
		let mut cur = self;
		loop {
			match &cur.0.frame {
				Some(f) if f.key == key => return f.value.clone(),
				Some(f) => cur = f.parent.as_ref().expect("derived frame always has a parent"),
				None => return String::new(),
			}
		}
	}

	/// Typed view: returns "" when absent, matching the original's `get_str`.
	pub fn get_string(&self, key: &str) -> String {
		self.get(key)
	}

	/// Typed view: returns 0 when absent or not parseable as an integer.
	pub fn get_int(&self, key: &str) -> i64 {
		self.get(key).parse().unwrap_or(0)
	}

	/// Flattened key -> value view; child frames win on key collision.
	/// Computed once per node and cached, since the chain is immutable.
	pub fn values(&self) -> HashMap<String, String> {
		self
			.0
			.flattened
			.get_or_init(|| match &self.0.frame {
				None => HashMap::new(),
				Some(f) => {
					let mut vals = f
						.parent
						.as_ref()
						.expect("derived frame always has a parent")
						.values();
					vals.insert(f.key.clone(), f.value.clone());
					vals
				},
			})
			.clone()
	}
}

impl Default for Context {
	fn default() -> Self {
		Context::root()
	}
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_map().entries(self.values()).finish()
	}
}

/// Re-injects the reserved ids from `job` into `ctx` for every key missing
/// from `ctx` — the override-wins-but-never-drops rule from the parse
/// pipeline (spec §4.5.3 step 3).
pub fn reinject_reserved(ctx: &Context, job: &Context) -> Context {
	let mut ctx = ctx.clone();
	for key in RESERVED_IDS {
		if ctx.get(key).is_empty() {
			ctx = ctx.derive(key, job.get(key));
		}
	}
	ctx
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derive_chain_flattens_with_child_wins() {
		let root = Context::root();
		let ctx = root.derive("k1", "v1").derive("k2", "v2");
		let vals = ctx.values();
		assert_eq!(vals.get("k1").map(String::as_str), Some("v1"));
		assert_eq!(vals.get("k2").map(String::as_str), Some("v2"));
		assert_eq!(vals.len(), 2);
	}

	#[test]
	fn child_overrides_parent_on_collision() {
		let ctx = Context::root().derive("k", "parent").derive("k", "child");
		assert_eq!(ctx.get("k"), "child");
		assert_eq!(ctx.values().get("k").map(String::as_str), Some("child"));
	}

	#[test]
	fn missing_key_returns_empty_or_zero() {
		let ctx = Context::root();
		assert_eq!(ctx.get("nope"), "");
		assert_eq!(ctx.get_int("nope"), 0);
	}

	#[test]
	fn get_int_coerces_invalid_to_zero() {
		let ctx = Context::root().derive(INDEX, "not-a-number");
		assert_eq!(ctx.get_int(INDEX), 0);
		let ctx = Context::root().derive(INDEX, "3");
		assert_eq!(ctx.get_int(INDEX), 3);
	}

	#[test]
	fn reinject_fills_only_missing_reserved_ids() {
		let job = Context::root()
			.derive(TRACING_ID, "t1")
			.derive(JOB_ID, "j1")
			.derive(REQ_ID, "r1")
			.derive(STORE_ID, "s1");
		let overridden = Context::root().derive(TRACING_ID, "override");
		let merged = reinject_reserved(&overridden, &job);
		assert_eq!(merged.get(TRACING_ID), "override");
		assert_eq!(merged.get(JOB_ID), "j1");
		assert_eq!(merged.get(REQ_ID), "r1");
		assert_eq!(merged.get(STORE_ID), "s1");
	}
}
