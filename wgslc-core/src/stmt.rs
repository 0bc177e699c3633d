//! Structured statements of a function body.

use crate::arena::{Handle, Range};
use crate::expr::Expression;
use crate::module::Function;

/// A sequence of statements. Bodies, branch arms, case bodies and continuing
/// blocks all share this shape.
pub type Block = Vec<Statement>;

/// A selector attached to one switch case. `Default` may share a case body
/// with explicit values.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum SwitchValue {
    I32(i32),
    U32(u32),
    Default,
}

#[derive(PartialEq, Clone, Debug)]
pub struct SwitchCase {
    /// One or more selectors sharing this body.
    pub values: Vec<SwitchValue>,
    pub body: Block,
}

/// Read-modify-write operations on atomics.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum AtomicFunction {
    Add,
    Subtract,
    And,
    ExclusiveOr,
    InclusiveOr,
    Min,
    Max,
    Exchange {
        /// Present for compare-exchange.
        compare: Option<Handle<Expression>>,
    },
}

bitflags::bitflags! {
    /// Memory scopes synchronized by a barrier.
    #[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Default)]
    pub struct Barrier: u32 {
        /// Storage buffer accesses.
        const STORAGE = 0x1;
        /// Workgroup shared memory accesses.
        const WORK_GROUP = 0x2;
        /// Subgroup invocations.
        const SUB_GROUP = 0x4;
        /// Storage image accesses.
        const TEXTURE = 0x8;
    }
}

#[derive(PartialEq, Clone, Debug)]
pub enum Statement {
    /// Mark the expressions in the range as evaluated here. Emits generate no
    /// code of their own; they fix the point at which backends may bind a
    /// name to each expression in the range.
    Emit(Range<Expression>),
    /// A nested lexical scope.
    Block(Block),
    If {
        condition: Handle<Expression>,
        accept: Block,
        reject: Block,
    },
    Switch {
        selector: Handle<Expression>,
        cases: Vec<SwitchCase>,
    },
    /// The general loop form. `while` and `for` sugar lower onto this.
    /// `break_if` is evaluated at the end of the continuing block.
    Loop {
        body: Block,
        continuing: Block,
        break_if: Option<Handle<Expression>>,
    },
    /// Jump past the innermost enclosing loop or switch.
    Break,
    /// Jump to the continuing block of the innermost enclosing loop.
    Continue,
    Return {
        value: Option<Handle<Expression>>,
    },
    /// Fragment discard.
    Kill,
    /// Write through a pointer. Writing through a pointer to an atomic is an
    /// atomic store.
    Store {
        pointer: Handle<Expression>,
        value: Handle<Expression>,
    },
    ImageStore {
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        value: Handle<Expression>,
    },
    /// A read-modify-write atomic operation. `result` is the
    /// `Expression::AtomicResult` holding the previous value.
    Atomic {
        pointer: Handle<Expression>,
        fun: AtomicFunction,
        value: Handle<Expression>,
        result: Handle<Expression>,
    },
    Barrier(Barrier),
    Call {
        function: Handle<Function>,
        arguments: Vec<Handle<Expression>>,
        /// The `Expression::CallResult` for non-void callees.
        result: Option<Handle<Expression>>,
    },
    /// Load a workgroup variable uniformly across the workgroup, with the
    /// implied barriers.
    WorkGroupUniformLoad {
        pointer: Handle<Expression>,
        result: Handle<Expression>,
    },
    /// Ray query operations. Carried in the statement set for completeness;
    /// the validator rejects modules containing it.
    RayQuery {
        query: Handle<Expression>,
    },
}

/// Helper for building `Emit` statements while lowering.
///
/// `start` records the arena length; `finish` returns an `Emit` covering
/// everything appended since, if anything was.
#[derive(Debug, Default)]
pub struct Emitter {
    start_len: usize,
}

impl Emitter {
    pub fn start(&mut self, arena: &crate::arena::Arena<Expression>) {
        self.start_len = arena.len();
    }

    #[must_use]
    pub fn finish(&self, arena: &crate::arena::Arena<Expression>) -> Option<Statement> {
        let range = arena.range_from(self.start_len);
        if range.is_empty() {
            None
        } else {
            Some(Statement::Emit(range))
        }
    }
}
