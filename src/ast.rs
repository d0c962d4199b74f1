//! The block tree handed to the compiler by the editor.
//!
//! Blocks are referenced by their GUI selector name (e.g. `doRepeat`) and carry an ordered list of input [`Slot`]s.
//! Statement chains are singly linked through [`Block::next`]; reporters and predicates never have a successor.

use alloc::boxed::Box;
use alloc::vec::Vec;

use compact_str::CompactString;

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

/// The visual shape of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum BlockKind {
    #[default]
    Command,
    Reporter,
    Predicate,
    Hat,
}

/// An input slot of a [`Block`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Slot {
    /// Text typed (or picked from a dropdown) directly into the slot.
    Literal(CompactString),
    /// A C-shaped slot holding a (possibly empty) statement chain.
    NestedStatement(Option<Box<Block>>),
    /// A reporter or predicate dropped into the slot.
    NestedReporter(Box<Block>),
    /// An expandable list of inputs, flattened in order when compiled.
    Variadic(Vec<Slot>),
    /// A variable name bound by the block itself.
    UpvarName(CompactString),
}

/// A single block instance, together with the rest of the chain below it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    pub selector: CompactString,
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: BlockKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub inputs: Vec<Slot>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub next: Option<Box<Block>>,
}
impl Block {
    pub fn new(selector: &str, kind: BlockKind, inputs: Vec<Slot>) -> Self {
        Self { selector: selector.into(), kind, inputs, next: None }
    }
    /// Appends `next` to the end of this chain.
    pub fn then(mut self, next: Block) -> Self {
        let mut tail = &mut self.next;
        while let Some(block) = tail {
            tail = &mut block.next;
        }
        *tail = Some(Box::new(next));
        self
    }
    /// Iterates over this block and every block chained below it.
    pub fn chain(&self) -> impl Iterator<Item = &Block> {
        core::iter::successors(Some(self), |x| x.next.as_deref())
    }
}

/// A set of top-level scripts, as loaded from a project file.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Project {
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: CompactString,
    pub scripts: Vec<Block>,
}

macro_rules! selectors {
    ($($(#[$attr:meta])* $variant:ident => $name:literal),+ $(,)?) => {
        /// Every block the board compiler knows how to lower.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Selector {
            $($(#[$attr])* $variant,)+
        }
        impl Selector {
            /// All known selectors, in palette order.
            pub const ALL: &'static [Selector] = &[$(Selector::$variant,)+];

            /// The GUI name of this selector.
            pub fn name(self) -> &'static str {
                match self {
                    $(Selector::$variant => $name,)+
                }
            }
            /// Looks up a selector by its GUI name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Selector::$variant),)+
                    _ => None,
                }
            }
        }
    };
}
selectors! {
    ReceiveGo => "receiveGo",
    DoWait => "doWait",
    DoWaitUntil => "doWaitUntil",
    DoForever => "doForever",
    DoRepeat => "doRepeat",
    DoIf => "doIf",
    DoIfElse => "doIfElse",
    DoStopThis => "doStopThis",
    DoStopAll => "doStopAll",
    DoRun => "doRun",
    Evaluate => "evaluate",
    ReifyScript => "reifyScript",
    ReifyReporter => "reifyReporter",
    DoReport => "doReport",

    ReportSum => "reportSum",
    ReportDifference => "reportDifference",
    ReportProduct => "reportProduct",
    ReportQuotient => "reportQuotient",
    ReportModulus => "reportModulus",
    ReportMonadic => "reportMonadic",
    ReportRandom => "reportRandom",
    ReportLessThan => "reportLessThan",
    ReportEquals => "reportEquals",
    ReportGreaterThan => "reportGreaterThan",
    ReportAnd => "reportAnd",
    ReportOr => "reportOr",
    ReportNot => "reportNot",
    ReportTrue => "reportTrue",
    ReportFalse => "reportFalse",
    ReportJoinWords => "reportJoinWords",
    /// Raw Lua typed by the user, run as the body of a function.
    RunLua => "runLua",

    ReportGetVar => "reportGetVar",
    DoSetVar => "doSetVar",
    DoChangeVar => "doChangeVar",
    ReportNewList => "reportNewList",
    ReportListItem => "reportListItem",
    ReportListLength => "reportListLength",
    ReportListContainsItem => "reportListContainsItem",
    AddListItem => "addListItem",
    DeleteListItem => "deleteListItem",
    InsertListItem => "insertListItem",
    ReplaceListItem => "replaceListItem",

    SetPinDigital => "setPinDigital",
    SetPinAnalog => "setPinAnalog",
    GetPinDigital => "getPinDigital",
    GetPinAnalog => "getPinAnalog",

    /// Hat block whose chain runs every time a matching message arrives.
    SubscribeToMqttMessage => "subscribeToMQTTmessage",
    PublishMqttMessage => "publishMQTTmessage",
}
impl Selector {
    /// Checks if this selector starts a script rather than appearing inside one.
    pub fn is_hat(self) -> bool {
        matches!(self, Selector::ReceiveGo | Selector::SubscribeToMqttMessage)
    }
    /// Checks if this block ends up at a point where other coroutines get to run.
    pub fn yields(self) -> bool {
        matches!(self, Selector::DoWait | Selector::DoWaitUntil | Selector::DoForever | Selector::DoRepeat)
    }
}
impl core::fmt::Display for Selector {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn test_selector_names() {
    for &selector in Selector::ALL {
        assert_eq!(Selector::from_name(selector.name()), Some(selector));
    }
    assert_eq!(Selector::from_name("subscribeToMQTTmessage"), Some(Selector::SubscribeToMqttMessage));
    assert_eq!(Selector::from_name("doTurnLeft"), None);
    assert!(Selector::ReceiveGo.is_hat());
    assert!(!Selector::DoForever.is_hat());
}

#[test]
fn test_block_chain() {
    let chain = Block::new("receiveGo", BlockKind::Hat, vec![])
        .then(Block::new("doSetVar", BlockKind::Command, vec![Slot::Literal("x".into()), Slot::Literal("1".into())]))
        .then(Block::new("doStopThis", BlockKind::Command, vec![]));
    assert_eq!(chain.chain().map(|x| x.selector.as_str()).collect::<Vec<_>>(), ["receiveGo", "doSetVar", "doStopThis"]);
}
