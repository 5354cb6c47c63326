//! Stable symbolic names for source emission.

use std::collections::HashMap;

use fusejit::ArrayId;

/// Assigns deterministic names (`a`, `b`, .., `z`, `aa`, ..) to array
/// identities in first-seen order. Names are stable for the lifetime of one
/// generation pass and never collide.
#[derive(Default)]
pub struct NodeNamer {
    names: HashMap<ArrayId, String>,
}

impl NodeNamer {
    pub fn name(&mut self, id: ArrayId) -> String {
        let next = self.names.len();
        self.names
            .entry(id)
            .or_insert_with(|| spell(next))
            .clone()
    }
}

fn spell(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'a' + (index % 26) as u8);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}
