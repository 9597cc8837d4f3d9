//! Appliance call correlation and guestfsd scope nesting.
//!
//! Invocations are queued per `(handle, name)` and results pop the oldest
//! entry of the matching queue, so calls are never matched out of invocation
//! order however many distinct names interleave. Guest commands seen while a
//! guestfsd scope is open belong to the call that scope served.

use crate::guest::same_executable;
use crate::types::{ApiCall, GuestCommand, TraceEntry};
use std::collections::{BTreeMap, VecDeque};

/// Identity of a call for correlation purposes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CallKey {
    pub handle: String,
    pub name: String,
}

impl CallKey {
    pub fn new(handle: &str, name: &str) -> Self {
        Self {
            handle: handle.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug)]
struct OpenCall {
    call: ApiCall,
    /// Position of the matching entry in the flat trace list
    trace_index: usize,
}

/// An open guestfsd request interval
#[derive(Debug)]
struct GuestScope {
    name: String,
    commands: Vec<GuestCommand>,
}

/// Everything the correlator hands back at end of section
#[derive(Debug, Default)]
pub(crate) struct CorrelatedCalls {
    pub api_calls: Vec<ApiCall>,
    pub trace: Vec<TraceEntry>,
    pub top_level_commands: Vec<GuestCommand>,
}

#[derive(Debug, Default)]
pub(crate) struct CallCorrelator {
    open: BTreeMap<CallKey, VecDeque<OpenCall>>,
    completed: Vec<ApiCall>,
    trace: Vec<TraceEntry>,
    scope: Option<GuestScope>,
    top_level: Vec<GuestCommand>,
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invocation.
    pub fn invoke(&mut self, handle: &str, name: &str, args: &str, line: usize) {
        let trace_index = self.trace.len();
        self.trace.push(TraceEntry {
            handle: handle.to_string(),
            name: name.to_string(),
            args: args.to_string(),
            result: None,
            line,
            result_line: None,
        });

        let call = ApiCall {
            name: name.to_string(),
            handle: handle.to_string(),
            args: args.to_string(),
            result: String::new(),
            guest_commands: Vec::new(),
            line,
            result_line: None,
            duration_seconds: None,
        };
        self.open
            .entry(CallKey::new(handle, name))
            .or_default()
            .push_back(OpenCall { call, trace_index });
    }

    /// Match a `name = value` result to the oldest open call with that key.
    ///
    /// Returns the completed call, or `None` when nothing was waiting.
    pub fn resolve(&mut self, handle: &str, name: &str, value: &str, line: usize) -> Option<&ApiCall> {
        let key = CallKey::new(handle, name);
        let queue = self.open.get_mut(&key)?;
        let OpenCall {
            mut call,
            trace_index,
        } = queue.pop_front()?;
        if queue.is_empty() {
            self.open.remove(&key);
        }

        if let Some(entry) = self.trace.get_mut(trace_index) {
            entry.result = Some(value.to_string());
            entry.result_line = Some(line);
        }
        call.result = value.to_string();
        call.result_line = Some(line);
        self.completed.push(call);
        self.completed.last()
    }

    /// Match a bare `= value` result to the most recent flat trace entry.
    pub fn resolve_bare(&mut self, value: &str, line: usize) -> Option<&ApiCall> {
        let last = self.trace.last()?;
        if last.result.is_some() {
            return None;
        }
        let (handle, name) = (last.handle.clone(), last.name.clone());
        self.resolve(&handle, &name, value, line)
    }

    /// Open a guestfsd scope; a scope left open is closed first.
    pub fn enter_scope(&mut self, name: &str) {
        if let Some(previous) = self.scope.take() {
            self.attach_scope(previous, None, None);
        }
        self.scope = Some(GuestScope {
            name: name.to_string(),
            commands: Vec::new(),
        });
    }

    /// Close the open guestfsd scope, stamping its duration on the call it served.
    pub fn exit_scope(&mut self, name: &str, seconds: f64) {
        match self.scope.take() {
            Some(scope) => self.attach_scope(scope, Some(name), Some(seconds)),
            None => {
                // Exit without a seen enter still carries a duration.
                if let Some(call) = self.oldest_open_named_mut(name) {
                    call.duration_seconds.get_or_insert(seconds);
                }
            }
        }
    }

    /// Attach a guest command to the innermost host available.
    pub fn add_command(&mut self, command: GuestCommand) {
        if let Some(scope) = self.scope.as_mut() {
            scope.commands.push(command);
        } else if let Some(call) = self.newest_open_mut() {
            call.guest_commands.push(command);
        } else {
            self.top_level.push(command);
        }
    }

    /// Most recent guest command with this executable, searched outward:
    /// open scope, open calls, completed calls, then the top-level slot.
    pub fn find_command_mut(&mut self, executable: &str) -> Option<&mut GuestCommand> {
        let matches = |cmd: &GuestCommand| same_executable(&cmd.executable, executable);

        if self
            .scope
            .as_ref()
            .is_some_and(|scope| scope.commands.iter().any(matches))
        {
            return self
                .scope
                .as_mut()?
                .commands
                .iter_mut()
                .rev()
                .find(|cmd| matches(&**cmd));
        }

        let newest_open = self
            .open
            .iter()
            .flat_map(|(key, queue)| {
                queue
                    .iter()
                    .enumerate()
                    .map(move |(idx, open)| (key, idx, &open.call))
            })
            .filter(|(_, _, call)| call.guest_commands.iter().any(matches))
            .max_by_key(|(_, _, call)| call.line)
            .map(|(key, idx, _)| (key.clone(), idx));
        if let Some((key, idx)) = newest_open {
            return self
                .open
                .get_mut(&key)?
                .get_mut(idx)?
                .call
                .guest_commands
                .iter_mut()
                .rev()
                .find(|cmd| matches(&**cmd));
        }

        if let Some(pos) = self
            .completed
            .iter()
            .rposition(|call| call.guest_commands.iter().any(matches))
        {
            return self.completed[pos]
                .guest_commands
                .iter_mut()
                .rev()
                .find(|cmd| matches(&**cmd));
        }

        self.top_level.iter_mut().rev().find(|cmd| matches(&**cmd))
    }

    /// Close any open scope, move unmatched calls to the completed list and
    /// order everything by invocation line.
    pub fn finish(mut self) -> CorrelatedCalls {
        if let Some(scope) = self.scope.take() {
            self.attach_scope(scope, None, None);
        }

        let open = std::mem::take(&mut self.open);
        self.completed
            .extend(open.into_values().flatten().map(|open| open.call));
        self.completed.sort_by_key(|call| call.line);

        CorrelatedCalls {
            api_calls: self.completed,
            trace: self.trace,
            top_level_commands: self.top_level,
        }
    }

    fn attach_scope(&mut self, scope: GuestScope, exit_name: Option<&str>, seconds: Option<f64>) {
        let GuestScope { name, commands } = scope;
        let names: Vec<&str> = match exit_name {
            Some(exit) if exit != name => vec![exit, name.as_str()],
            _ => vec![name.as_str()],
        };

        let target = if let Some(name) = names
            .iter()
            .copied()
            .find(|n| self.oldest_open_named(n).is_some())
        {
            self.oldest_open_named_mut(name)
        } else if let Some(pos) = names
            .iter()
            .find_map(|n| self.completed.iter().rposition(|call| call.name == *n))
        {
            self.completed.get_mut(pos)
        } else {
            self.newest_open_mut()
        };

        match target {
            Some(call) => {
                if let Some(seconds) = seconds {
                    call.duration_seconds.get_or_insert(seconds);
                }
                call.guest_commands.extend(commands);
            }
            None => self.top_level.extend(commands),
        }
    }

    fn oldest_open_named(&self, name: &str) -> Option<&ApiCall> {
        self.open
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter_map(|(_, queue)| queue.front())
            .map(|open| &open.call)
            .min_by_key(|call| call.line)
    }

    fn oldest_open_named_mut(&mut self, name: &str) -> Option<&mut ApiCall> {
        self.open
            .iter_mut()
            .filter(|(key, _)| key.name == name)
            .filter_map(|(_, queue)| queue.front_mut())
            .map(|open| &mut open.call)
            .min_by_key(|call| call.line)
    }

    fn newest_open_mut(&mut self) -> Option<&mut ApiCall> {
        self.open
            .values_mut()
            .flat_map(|queue| queue.iter_mut())
            .map(|open| &mut open.call)
            .max_by_key(|call| call.line)
    }
}
