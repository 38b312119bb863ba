//! Loaded functions, breakpoints, and the indices over them.
//!
//! Every [`Breakpoint`] is owned by exactly one [`SourceFunction`]; the line
//! index and the active table refer to breakpoints through non-owning
//! [`BreakpointKey`]s (offsets are unique within a function), so releasing a
//! function invalidates every reference without dangling.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Opaque engine-assigned identity of a parsed function's byte-code.
pub type FunctionHandle = u64;

/// Non-owning reference to one breakpoint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointKey {
    pub handle: FunctionHandle,
    pub offset: u32,
}

/// One breakpoint slot of a function. `active_index` is the client-visible
/// index while active; `None` means inactive.
#[derive(Debug)]
pub struct Breakpoint {
    pub line: u32,
    pub offset: u32,
    pub active_index: Option<u32>,
}

/// A parsed function with its source text and breakpoint slots.
#[derive(Debug)]
pub struct SourceFunction {
    pub handle: FunctionHandle,
    /// Source text of the whole unit, line-split.
    pub source: Vec<String>,
    pub source_name: String,
    pub name: String,
    /// Declaration position.
    pub line: u32,
    pub column: u32,
    slots: Vec<Breakpoint>,
    by_offset: HashMap<u32, usize>,
    /// Distinct slot lines in first-occurrence order; value is the slot that
    /// represents the line (the last slot declared on it).
    line_slots: Vec<(u32, usize)>,
}

impl SourceFunction {
    pub fn new(
        handle: FunctionHandle,
        line: u32,
        column: u32,
        source_text: &str,
        source_name: String,
        name: String,
        locations: &[(u32, u32)],
    ) -> Self {
        let mut slots = Vec::with_capacity(locations.len());
        let mut by_offset = HashMap::with_capacity(locations.len());
        let mut line_slots: Vec<(u32, usize)> = Vec::new();
        for (index, &(slot_line, slot_offset)) in locations.iter().enumerate() {
            slots.push(Breakpoint {
                line: slot_line,
                offset: slot_offset,
                active_index: None,
            });
            by_offset.insert(slot_offset, index);
            match line_slots.iter_mut().find(|(l, _)| *l == slot_line) {
                Some(entry) => entry.1 = index,
                None => line_slots.push((slot_line, index)),
            }
        }
        Self {
            handle,
            source: split_source_lines(source_text),
            source_name,
            name,
            line,
            column,
            slots,
            by_offset,
            line_slots,
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = &Breakpoint> {
        self.slots.iter()
    }

    pub fn first_slot(&self) -> Option<&Breakpoint> {
        self.slots.first()
    }

    pub fn slot_at_offset(&self, offset: u32) -> Option<&Breakpoint> {
        self.by_offset.get(&offset).map(|&index| &self.slots[index])
    }

    fn slot_at_offset_mut(&mut self, offset: u32) -> Option<&mut Breakpoint> {
        self.by_offset
            .get(&offset)
            .copied()
            .map(move |index| &mut self.slots[index])
    }

    fn line_slots(&self) -> impl Iterator<Item = (u32, &Breakpoint)> {
        self.line_slots
            .iter()
            .map(move |&(line, index)| (line, &self.slots[index]))
    }
}

/// Splits on `\r\n`, `\r`, or `\n`; a trailing empty line is dropped.
fn split_source_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' => lines.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    lines.push(current);
    if lines.len() > 1 && lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// A breakpoint request with no loaded target yet.
#[derive(Debug)]
pub struct PendingBreakpoint {
    /// Client-visible index, drawn from the same counter as active indices.
    pub index: u32,
    pub target: BreakTarget,
}

/// What a set-breakpoint request names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakTarget {
    /// `file:line` form; the source name matches exactly or as a path suffix.
    Location { source: String, line: u32 },
    /// Bare function name form.
    Function { name: String },
}

impl std::fmt::Display for BreakTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakTarget::Location { source, line } => write!(f, "{source}:{line}"),
            BreakTarget::Function { name } => write!(f, "{name}()"),
        }
    }
}

/// How a hit offset mapped onto a breakpoint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Exact,
    Nearest,
}

/// All loaded functions plus the cross-function indices: the line multimap,
/// the active breakpoint table, and the pending set.
#[derive(Debug, Default)]
pub struct Registry {
    functions: HashMap<FunctionHandle, SourceFunction>,
    /// line number -> breakpoints on that line across all functions,
    /// insertion order preserved so nested functions stay discoverable.
    line_index: HashMap<u32, Vec<BreakpointKey>>,
    /// Client index -> breakpoint. Indices are strictly increasing and never
    /// reused for the lifetime of the registry.
    active: BTreeMap<u32, BreakpointKey>,
    pending: Vec<PendingBreakpoint>,
    next_index: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, handle: FunctionHandle) -> Option<&SourceFunction> {
        self.functions.get(&handle)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Registers a parsed function and merges its slots into the line index.
    pub fn insert_function(&mut self, function: SourceFunction) {
        tracing::debug!(
            "registering function {:#x} ({}) with {} breakpoint slots",
            function.handle,
            if function.name.is_empty() { "<anonymous>" } else { function.name.as_str() },
            function.slots.len()
        );
        for (line, slot) in function.line_slots() {
            self.line_index.entry(line).or_default().push(BreakpointKey {
                handle: function.handle,
                offset: slot.offset,
            });
        }
        self.functions.insert(function.handle, function);
    }

    /// Removes a released function and purges its breakpoints from the line
    /// index and the active table. Returns false for an unknown handle.
    pub fn release_function(&mut self, handle: FunctionHandle) -> bool {
        let Some(function) = self.functions.remove(&handle) else {
            return false;
        };
        for (line, slot) in function.line_slots() {
            if let Some(entries) = self.line_index.get_mut(&line) {
                entries.retain(|key| key.handle != handle);
                if entries.is_empty() {
                    self.line_index.remove(&line);
                }
            }
            if let Some(index) = slot.active_index {
                self.active.remove(&index);
            }
        }
        tracing::debug!("function {:#x} byte-code released", handle);
        true
    }

    /// Candidate breakpoints for an activation request, in index order. With
    /// `only` set, candidates are restricted to those function handles.
    pub fn candidates(
        &self,
        target: &BreakTarget,
        only: Option<&HashSet<FunctionHandle>>,
    ) -> Vec<BreakpointKey> {
        let allowed = |handle: FunctionHandle| only.map_or(true, |set| set.contains(&handle));
        match target {
            BreakTarget::Location { source, line } => self
                .line_index
                .get(line)
                .into_iter()
                .flatten()
                .filter(|key| allowed(key.handle))
                .filter(|key| {
                    self.functions
                        .get(&key.handle)
                        .is_some_and(|f| source_name_matches(&f.source_name, source))
                })
                .copied()
                .collect(),
            BreakTarget::Function { name } => {
                let mut matches: Vec<&SourceFunction> = self
                    .functions
                    .values()
                    .filter(|f| f.name == *name && allowed(f.handle))
                    .collect();
                matches.sort_by_key(|f| (f.line, f.handle));
                matches
                    .iter()
                    .filter_map(|f| {
                        f.first_slot().map(|slot| BreakpointKey {
                            handle: f.handle,
                            offset: slot.offset,
                        })
                    })
                    .collect()
            }
        }
    }

    /// Activates a breakpoint. Re-activating an active one is a no-op that
    /// returns the existing index; otherwise the next never-reused index is
    /// assigned. The boolean reports whether the state changed.
    pub fn activate(&mut self, key: BreakpointKey) -> Option<(u32, bool)> {
        let slot = self
            .functions
            .get_mut(&key.handle)
            .and_then(|f| f.slot_at_offset_mut(key.offset))?;
        if let Some(index) = slot.active_index {
            return Some((index, false));
        }
        self.next_index += 1;
        slot.active_index = Some(self.next_index);
        self.active.insert(self.next_index, key);
        tracing::debug!("breakpoint {} activated at offset {}", self.next_index, key.offset);
        Some((self.next_index, true))
    }

    /// Deactivates by client index, resetting the slot sentinel.
    pub fn deactivate(&mut self, index: u32) -> Option<BreakpointKey> {
        let key = self.active.remove(&index)?;
        if let Some(slot) = self
            .functions
            .get_mut(&key.handle)
            .and_then(|f| f.slot_at_offset_mut(key.offset))
        {
            slot.active_index = None;
        }
        Some(key)
    }

    pub fn active_index_of(&self, key: BreakpointKey) -> Option<u32> {
        self.functions
            .get(&key.handle)
            .and_then(|f| f.slot_at_offset(key.offset))
            .and_then(|slot| slot.active_index)
    }

    /// Active entries in ascending index order.
    pub fn active_entries(&self) -> impl Iterator<Item = (u32, BreakpointKey)> + '_ {
        self.active.iter().map(|(&index, &key)| (index, key))
    }

    pub fn active_is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Registers a pending request under a fresh client index.
    pub fn add_pending(&mut self, target: BreakTarget) -> u32 {
        self.next_index += 1;
        tracing::debug!("pending breakpoint {} registered for {}", self.next_index, target);
        self.pending.push(PendingBreakpoint {
            index: self.next_index,
            target,
        });
        self.next_index
    }

    pub fn pending_entries(&self) -> impl Iterator<Item = &PendingBreakpoint> {
        self.pending.iter()
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn remove_pending(&mut self, index: u32) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.index != index);
        self.pending.len() != before
    }

    /// Scans the pending set against newly registered functions without
    /// mutating it: promotions are collected first and applied by the caller
    /// once the scan is complete.
    pub fn match_pending(
        &self,
        new_handles: &HashSet<FunctionHandle>,
    ) -> Vec<(u32, Vec<BreakpointKey>)> {
        self.pending
            .iter()
            .filter_map(|pending| {
                let keys = self.candidates(&pending.target, Some(new_handles));
                if keys.is_empty() {
                    None
                } else {
                    Some((pending.index, keys))
                }
            })
            .collect()
    }

    /// Resolves a hit (handle, offset) to the owning breakpoint: an exact
    /// offset match wins; an offset before the first slot maps to the first
    /// slot; otherwise the slot with the greatest offset not above the hit.
    pub fn resolve_hit(
        &self,
        handle: FunctionHandle,
        offset: u32,
    ) -> Option<(BreakpointKey, HitKind)> {
        let function = self.functions.get(&handle)?;
        if function.slot_at_offset(offset).is_some() {
            return Some((BreakpointKey { handle, offset }, HitKind::Exact));
        }
        let first = function.first_slot()?;
        if offset < first.offset {
            return Some((
                BreakpointKey {
                    handle,
                    offset: first.offset,
                },
                HitKind::Nearest,
            ));
        }
        let nearest = function
            .slots()
            .filter(|slot| slot.offset <= offset)
            .max_by_key(|slot| slot.offset)?;
        Some((
            BreakpointKey {
                handle,
                offset: nearest.offset,
            },
            HitKind::Nearest,
        ))
    }

    /// `source_name:line` description of a breakpoint, for stop and listing
    /// output.
    pub fn describe(&self, key: BreakpointKey) -> String {
        let Some(function) = self.functions.get(&key.handle) else {
            return "<unknown>".to_string();
        };
        let name = if function.source_name.is_empty() {
            "<unknown>"
        } else {
            &function.source_name
        };
        match function.slot_at_offset(key.offset) {
            Some(slot) => format!("{}:{}", name, slot.line),
            None => name.to_string(),
        }
    }
}

/// Exact source name, or a path suffix after `/` or `\`.
fn source_name_matches(function_source: &str, requested: &str) -> bool {
    if function_source == requested {
        return true;
    }
    function_source.ends_with(&format!("/{requested}"))
        || function_source.ends_with(&format!("\\{requested}"))
}
