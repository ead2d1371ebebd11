//! Numbered sign-up lists: optional header lines, `1) name` slots numbered
//! from one, and an optional footer. Header and footer are kept verbatim.

use std::sync::LazyLock;

use regex::Regex;

static SLOT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\)\s*(.*)$").expect("hardcoded regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupList {
    header: Vec<String>,
    names: Vec<String>,
    footer: Option<String>,
}

impl SignupList {
    /// Returns `None` unless the slots are numbered 1, 2, 3, ... in order.
    pub fn parse(text: &str) -> Option<Self> {
        let lines = text.lines().collect::<Vec<_>>();
        let start = lines
            .iter()
            .position(|line| SLOT_PATTERN.is_match(line.trim()))?;

        let mut names = Vec::new();
        let mut footer = None;
        for (offset, line) in lines[start..].iter().enumerate() {
            let Some(captures) = SLOT_PATTERN.captures(line.trim()) else {
                footer = Some(lines[start + offset..].join("\n"));
                break;
            };
            let number = captures[1].parse::<usize>().ok()?;
            if number != names.len() + 1 {
                return None;
            }
            names.push(captures[2].trim().to_string());
        }

        Some(Self {
            header: lines[..start].iter().map(|line| line.to_string()).collect(),
            names,
            footer,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim();
        self.names.iter().any(|slot| slot == name)
    }

    /// Writes `name` into the first empty slot and returns its 1-based
    /// position, or `None` when every slot is taken.
    pub fn fill_first_empty(&mut self, name: &str) -> Option<usize> {
        let index = self.names.iter().position(|slot| slot.is_empty())?;
        self.names[index] = name.trim().to_string();
        Some(index + 1)
    }

    pub fn render(&self) -> String {
        let mut lines = self.header.clone();
        lines.extend(
            self.names
                .iter()
                .enumerate()
                .map(|(index, name)| format!("{}) {name}", index + 1)),
        );
        if let Some(footer) = &self.footer {
            lines.push(footer.clone());
        }
        lines.join("\n")
    }
}
