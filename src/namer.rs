//! Graph node naming.
//!
//! Steps get a fresh name per occurrence ([`TaskNamer::build_name`]). Dag
//! tasks are named once per distinct reference text ([`TaskNamer::get_name`]),
//! so repeated references in a chain resolve to the same task.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::signature::call_identifier;

/// Naming policy for dag tasks, selected by the flow's `task_names` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    /// `echo`, `echo2`, `echo3`, …
    #[default]
    Call,
    /// `echo(a, b)` → `echo-a-b`
    Midline,
    /// `Task1`, `Task2`, …
    Incr,
    /// `TaskA`, `TaskB`, …, `TaskZ`, `TaskAA`
    Letter,
}

impl NamingPolicy {
    pub fn namer(self) -> Box<dyn TaskNamer> {
        match self {
            NamingPolicy::Call => Box::new(CallNamer::default()),
            NamingPolicy::Midline => Box::new(MidlineNamer::default()),
            NamingPolicy::Incr => Box::new(IncrNamer::default()),
            NamingPolicy::Letter => Box::new(IncrNamer::letters()),
        }
    }
}

/// Names already handed out, plus the identity cache.
#[derive(Debug, Default)]
pub struct NameRegistry {
    issued: HashSet<String>,
    cache: HashMap<String, String>,
}

impl NameRegistry {
    /// Claim `candidate`, returning false if it was already issued.
    pub fn claim(&mut self, candidate: &str) -> bool {
        self.issued.insert(candidate.to_string())
    }
}

pub trait TaskNamer {
    /// Build a new name for `call`, never reusing an issued one.
    fn build_name(&mut self, call: &str) -> String;

    fn registry(&mut self) -> &mut NameRegistry;

    /// Name for `call`, reusing the name given to the same text before.
    fn get_name(&mut self, call: &str) -> String {
        if let Some(name) = self.registry().cache.get(call) {
            return name.clone();
        }
        let name = self.build_name(call);
        self.registry()
            .cache
            .insert(call.to_string(), name.clone());
        name
    }

    /// Mark an explicitly chosen name as taken.
    fn reserve(&mut self, name: &str) {
        self.registry().claim(name);
    }
}

fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

/// Names nodes after the called template.
#[derive(Debug, Default)]
pub struct CallNamer {
    counters: HashMap<String, usize>,
    registry: NameRegistry,
}

impl TaskNamer for CallNamer {
    fn build_name(&mut self, call: &str) -> String {
        let ident = sanitize(call_identifier(call));
        loop {
            let count = self.counters.entry(ident.clone()).or_insert(0);
            *count += 1;
            let candidate = if *count == 1 {
                ident.clone()
            } else {
                format!("{}{}", ident, count)
            };
            if self.registry.claim(&candidate) {
                return candidate;
            }
        }
    }

    fn registry(&mut self) -> &mut NameRegistry {
        &mut self.registry
    }
}

/// Names nodes after the whole call, arguments included.
#[derive(Debug, Default)]
pub struct MidlineNamer {
    registry: NameRegistry,
}

fn midline(call: &str) -> String {
    let call = call.rsplit('/').next().unwrap_or(call);
    let mut name = String::with_capacity(call.len());
    for c in call.chars() {
        match c {
            '(' | ',' | '.' | ':' => name.push('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => name.push(c),
            _ => {}
        }
    }
    let mut collapsed = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed.to_string()
    }
}

impl TaskNamer for MidlineNamer {
    fn build_name(&mut self, call: &str) -> String {
        let base = midline(call);
        if self.registry.claim(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.registry.claim(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn registry(&mut self) -> &mut NameRegistry {
        &mut self.registry
    }
}

/// Numbers nodes in order of first appearance.
#[derive(Debug, Default)]
pub struct IncrNamer {
    next: usize,
    letters: bool,
    registry: NameRegistry,
}

impl IncrNamer {
    /// Count with letters instead of digits.
    pub fn letters() -> Self {
        Self {
            letters: true,
            ..Self::default()
        }
    }

    fn suffix(&self) -> String {
        if !self.letters {
            return self.next.to_string();
        }
        // Bijective base 26: 1 → A, 26 → Z, 27 → AA.
        let mut n = self.next;
        let mut out = Vec::new();
        while n > 0 {
            n -= 1;
            out.push(b'A' + (n % 26) as u8);
            n /= 26;
        }
        out.iter().rev().map(|&b| b as char).collect()
    }
}

impl TaskNamer for IncrNamer {
    fn build_name(&mut self, _call: &str) -> String {
        loop {
            self.next += 1;
            let candidate = format!("Task{}", self.suffix());
            if self.registry.claim(&candidate) {
                return candidate;
            }
        }
    }

    fn registry(&mut self) -> &mut NameRegistry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_namer_fresh_names() {
        let mut namer = CallNamer::default();
        assert_eq!(namer.build_name("echo(a)"), "echo");
        assert_eq!(namer.build_name("echo(a)"), "echo2");
        assert_eq!(namer.build_name("echo(b)"), "echo3");
        assert_eq!(namer.build_name("gen()"), "gen");
    }

    #[test]
    fn test_call_namer_cached_names() {
        let mut namer = CallNamer::default();
        assert_eq!(namer.get_name("A"), "A");
        assert_eq!(namer.get_name("B(x)"), "B");
        assert_eq!(namer.get_name("A"), "A");
        assert_eq!(namer.get_name("B(y)"), "B2");
        assert_eq!(namer.get_name("B(x)"), "B");
    }

    #[test]
    fn test_call_namer_avoids_collisions() {
        let mut namer = CallNamer::default();
        namer.reserve("echo");
        assert_eq!(namer.build_name("echo(a)"), "echo2");
        assert_eq!(namer.build_name("echo2(a)"), "echo22");
    }

    #[test]
    fn test_qualified_call_uses_template_name() {
        let mut namer = CallNamer::default();
        assert_eq!(namer.build_name("cluster:lib/print(x)"), "print");
    }

    #[test]
    fn test_midline_namer() {
        let mut namer = MidlineNamer::default();
        assert_eq!(namer.get_name("echo(a, b)"), "echo-a-b");
        assert_eq!(namer.get_name("echo()"), "echo");
        assert_eq!(namer.get_name("echo(a,b)"), "echo-a-b-2");
        assert_eq!(namer.get_name("echo(a, b)"), "echo-a-b");
    }

    #[test]
    fn test_incr_namer() {
        let mut namer = IncrNamer::default();
        assert_eq!(namer.get_name("A"), "Task1");
        assert_eq!(namer.get_name("B"), "Task2");
        assert_eq!(namer.get_name("A"), "Task1");
    }

    #[test]
    fn test_letter_namer() {
        let mut namer = NamingPolicy::Letter.namer();
        assert_eq!(namer.get_name("xxx(1)"), "TaskA");
        assert_eq!(namer.get_name("xxx(2)"), "TaskB");
        assert_eq!(namer.get_name("xxx(1)"), "TaskA");

        let mut namer = IncrNamer::letters();
        let names: Vec<_> = (0..28).map(|i| namer.build_name(&i.to_string())).collect();
        assert_eq!(names[25], "TaskZ");
        assert_eq!(names[26], "TaskAA");
        assert_eq!(names[27], "TaskAB");
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: NamingPolicy = serde_yaml::from_str("midline").unwrap();
        assert_eq!(policy, NamingPolicy::Midline);
        assert_eq!(NamingPolicy::default(), NamingPolicy::Call);
    }
}
