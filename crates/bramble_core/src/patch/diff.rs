//! Character-level diff between two texts.
//!
//! Produces a minimal edit script of insert/delete spans (no move/copy),
//! then coalesces it so edits fall on semantically meaningful boundaries
//! instead of fragmenting mid-word. The script is the input to hunk
//! assembly in [`super::codec`].
//!
//! The middle phase is Myers' O(ND) greedy algorithm with a bounded edit
//! distance; past the bound the result degenerates to one deletion plus one
//! insertion, which is coarse but still a valid script.
//!
//! All offsets and lengths here count Unicode scalar values, not bytes.

/// Kind of one span in an edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Text present in both versions.
    Equal,
    /// Text present only in the old version.
    Delete,
    /// Text present only in the new version.
    Insert,
}

/// One span of an edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// What this span does.
    pub kind: EditKind,
    /// The span text.
    pub text: String,
}

impl Edit {
    /// Convenience constructor.
    pub fn new(kind: EditKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    fn chars(&self) -> usize {
        self.text.chars().count()
    }
}

/// Edit distance bound for the Myers phase. Replaying history touches every
/// stored patch, so a pathological pair degrades to delete-all/insert-all
/// rather than an unbounded search.
const MYERS_MAX_D: usize = 2000;

/// Compute the edit script transforming `old` into `new`.
///
/// The concatenation of Equal and Delete spans is exactly `old`; Equal and
/// Insert spans concatenate to exactly `new`.
pub fn diff(old: &str, new: &str) -> Vec<Edit> {
    if old == new {
        if old.is_empty() {
            return Vec::new();
        }
        return vec![Edit::new(EditKind::Equal, old)];
    }

    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = common_prefix(&old_chars, &new_chars);
    let suffix = common_suffix(&old_chars[prefix..], &new_chars[prefix..]);

    let old_mid = &old_chars[prefix..old_chars.len() - suffix];
    let new_mid = &new_chars[prefix..new_chars.len() - suffix];

    let mut edits = Vec::new();
    if prefix > 0 {
        edits.push(Edit::new(
            EditKind::Equal,
            old_chars[..prefix].iter().collect::<String>(),
        ));
    }
    edits.extend(diff_middle(old_mid, new_mid));
    if suffix > 0 {
        edits.push(Edit::new(
            EditKind::Equal,
            old_chars[old_chars.len() - suffix..].iter().collect::<String>(),
        ));
    }

    let edits = cleanup_merge(edits);
    let edits = cleanup_semantic(edits);
    cleanup_boundaries(edits)
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn common_prefix_str(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

fn common_suffix_str(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Split `s` after `n` chars.
fn split_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}

/// Diff after prefix/suffix trimming, so `a` and `b` share no edge text.
fn diff_middle(a: &[char], b: &[char]) -> Vec<Edit> {
    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }
    if a.is_empty() {
        return vec![Edit::new(EditKind::Insert, b.iter().collect::<String>())];
    }
    if b.is_empty() {
        return vec![Edit::new(EditKind::Delete, a.iter().collect::<String>())];
    }

    // Containment shortcut: if the shorter text sits whole inside the
    // longer, the script is a single equality flanked by edits.
    let a_str: String = a.iter().collect();
    let b_str: String = b.iter().collect();
    if a.len() <= b.len() {
        if let Some(byte_pos) = b_str.find(&a_str) {
            let at = b_str[..byte_pos].chars().count();
            let mut edits = Vec::new();
            if at > 0 {
                edits.push(Edit::new(EditKind::Insert, b[..at].iter().collect::<String>()));
            }
            edits.push(Edit::new(EditKind::Equal, a_str));
            if at + a.len() < b.len() {
                edits.push(Edit::new(
                    EditKind::Insert,
                    b[at + a.len()..].iter().collect::<String>(),
                ));
            }
            return edits;
        }
    } else if let Some(byte_pos) = a_str.find(&b_str) {
        let at = a_str[..byte_pos].chars().count();
        let mut edits = Vec::new();
        if at > 0 {
            edits.push(Edit::new(EditKind::Delete, a[..at].iter().collect::<String>()));
        }
        edits.push(Edit::new(EditKind::Equal, b_str));
        if at + b.len() < a.len() {
            edits.push(Edit::new(
                EditKind::Delete,
                a[at + b.len()..].iter().collect::<String>(),
            ));
        }
        return edits;
    }

    myers(a, b).unwrap_or_else(|| {
        vec![
            Edit::new(EditKind::Delete, a.iter().collect::<String>()),
            Edit::new(EditKind::Insert, b.iter().collect::<String>()),
        ]
    })
}

/// Myers greedy shortest-edit-script search with backtracking.
///
/// Returns `None` when the edit distance exceeds [`MYERS_MAX_D`].
fn myers(a: &[char], b: &[char]) -> Option<Vec<Edit>> {
    let n = a.len();
    let m = b.len();
    let max = n + m;
    let cap = max.min(MYERS_MAX_D);
    let offset = max + 1;

    // v[offset + k] holds the furthest x on diagonal k.
    let mut v = vec![0usize; 2 * max + 3];
    // Per-depth snapshots of the window k in [-(d+1), d+1], for backtracking.
    let mut trace: Vec<Vec<usize>> = Vec::new();
    let mut found_d = None;

    'search: for d in 0..=cap {
        trace.push(v[offset - (d + 1)..=offset + d + 1].to_vec());
        let d_i = d as isize;
        let mut k = -d_i;
        while k <= d_i {
            let idx = (offset as isize + k) as usize;
            let mut x = if k == -d_i || (k != d_i && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = (x as isize - k) as usize;
            while x < n && y < m && a[x] == b[y] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                found_d = Some(d);
                break 'search;
            }
            k += 2;
        }
    }

    let found_d = found_d?;

    // Walk the trace backwards, emitting one char per step.
    let mut steps: Vec<(EditKind, char)> = Vec::new();
    let mut x = n as isize;
    let mut y = m as isize;
    for d in (0..=found_d).rev() {
        let window = &trace[d];
        let at = |k: isize| -> isize { window[(k + d as isize + 1) as usize] as isize };
        let d_i = d as isize;
        let k = x - y;
        let prev_k = if k == -d_i || (k != d_i && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            steps.push((EditKind::Equal, a[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                steps.push((EditKind::Insert, b[prev_y as usize]));
            } else {
                steps.push((EditKind::Delete, a[prev_x as usize]));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    steps.reverse();

    // Coalesce per-char steps into runs.
    let mut edits: Vec<Edit> = Vec::new();
    for (kind, c) in steps {
        match edits.last_mut() {
            Some(last) if last.kind == kind => last.text.push(c),
            _ => edits.push(Edit::new(kind, c.to_string())),
        }
    }
    Some(edits)
}

/// Canonicalize a script: merge adjacent same-kind spans, drop empties,
/// order each change block delete-before-insert, and factor text common to
/// a block's deletion and insertion out into the surrounding equalities.
pub(super) fn cleanup_merge(mut edits: Vec<Edit>) -> Vec<Edit> {
    loop {
        let mut changed = false;
        let mut out: Vec<Edit> = Vec::new();
        let mut del = String::new();
        let mut ins = String::new();

        // Trailing sentinel flushes the last change block.
        edits.push(Edit::new(EditKind::Equal, ""));
        for edit in edits {
            match edit.kind {
                EditKind::Delete => del.push_str(&edit.text),
                EditKind::Insert => ins.push_str(&edit.text),
                EditKind::Equal => {
                    if !del.is_empty() && !ins.is_empty() {
                        // Factor a common prefix into the preceding equality.
                        let p = common_prefix_str(&del, &ins);
                        if p > 0 {
                            let (head, del_rest) = split_chars(&del, p);
                            let head = head.to_string();
                            let del_rest = del_rest.to_string();
                            let (_, ins_rest) = split_chars(&ins, p);
                            let ins_rest = ins_rest.to_string();
                            match out.last_mut() {
                                Some(prev) if prev.kind == EditKind::Equal => {
                                    prev.text.push_str(&head)
                                }
                                _ => out.push(Edit::new(EditKind::Equal, head)),
                            }
                            del = del_rest;
                            ins = ins_rest;
                            changed = true;
                        }
                        // Factor a common suffix into the following equality.
                        let s = common_suffix_str(&del, &ins);
                        if s > 0 {
                            let del_chars = del.chars().count();
                            let ins_chars = ins.chars().count();
                            let (del_rest, tail) = split_chars(&del, del_chars - s);
                            let tail = tail.to_string();
                            let del_rest = del_rest.to_string();
                            let (ins_rest, _) = split_chars(&ins, ins_chars - s);
                            let ins_rest = ins_rest.to_string();
                            del = del_rest;
                            ins = ins_rest;
                            // The suffix belongs before the upcoming equality.
                            out.push(Edit::new(EditKind::Delete, std::mem::take(&mut del)));
                            out.push(Edit::new(EditKind::Insert, std::mem::take(&mut ins)));
                            out.push(Edit::new(EditKind::Equal, tail));
                            changed = true;
                        }
                    }
                    if !del.is_empty() {
                        out.push(Edit::new(EditKind::Delete, std::mem::take(&mut del)));
                    }
                    if !ins.is_empty() {
                        out.push(Edit::new(EditKind::Insert, std::mem::take(&mut ins)));
                    }
                    if !edit.text.is_empty() {
                        match out.last_mut() {
                            Some(prev) if prev.kind == EditKind::Equal => {
                                prev.text.push_str(&edit.text);
                                changed = true;
                            }
                            _ => out.push(edit),
                        }
                    }
                }
            }
        }

        // Drop empty spans produced by factoring.
        let before = out.len();
        out.retain(|e| !e.text.is_empty());
        if out.len() != before {
            changed = true;
        }

        if !changed {
            return out;
        }
        edits = out;
    }
}

/// Absorb equalities too short to be meaningful between two change blocks,
/// coalescing fragmented edits into coherent chunks.
///
/// An equality is absorbed when it is no longer than the larger edit on
/// each side: it gets deleted with the left block and reinserted with the
/// right one. On each absorption the scan rewinds to the previous surviving
/// equality, since the enlarged block may now swallow that one too.
fn cleanup_semantic(mut edits: Vec<Edit>) -> Vec<Edit> {
    let mut changed = false;
    // Indices of equalities that may still be absorbed.
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<String> = None;
    // Edit chars before and after the candidate equality.
    let (mut ins_before, mut del_before) = (0usize, 0usize);
    let (mut ins_after, mut del_after) = (0usize, 0usize);

    let mut pointer = 0;
    while pointer < edits.len() {
        if edits[pointer].kind == EditKind::Equal {
            equalities.push(pointer);
            ins_before = ins_after;
            del_before = del_after;
            ins_after = 0;
            del_after = 0;
            last_equality = Some(edits[pointer].text.clone());
            pointer += 1;
            continue;
        }

        match edits[pointer].kind {
            EditKind::Insert => ins_after += edits[pointer].chars(),
            _ => del_after += edits[pointer].chars(),
        }
        let absorbable = last_equality.as_ref().is_some_and(|eq| {
            let len = eq.chars().count();
            len <= ins_before.max(del_before) && len <= ins_after.max(del_after)
        });
        if absorbable
            && let Some(&idx) = equalities.last()
            && let Some(text) = last_equality.take()
        {
            // The equality rejoins both sides: deleted and reinserted.
            edits[idx] = Edit::new(EditKind::Delete, text.clone());
            edits.insert(idx + 1, Edit::new(EditKind::Insert, text));
            equalities.pop();
            // The previous equality is a fresh candidate now; rescan from
            // just past it.
            equalities.pop();
            pointer = equalities.last().map(|i| i + 1).unwrap_or(0);
            ins_before = 0;
            del_before = 0;
            ins_after = 0;
            del_after = 0;
            changed = true;
        } else {
            pointer += 1;
        }
    }

    if changed {
        edits = cleanup_merge(edits);
    }
    edits
}

/// Slide single edits that sit between two equalities so their boundaries
/// land on word, line, or sentence edges rather than mid-word.
fn cleanup_boundaries(mut edits: Vec<Edit>) -> Vec<Edit> {
    let mut i = 1;
    while i + 1 < edits.len() {
        if edits[i - 1].kind == EditKind::Equal
            && edits[i + 1].kind == EditKind::Equal
            && edits[i].kind != EditKind::Equal
        {
            let mut eq1 = edits[i - 1].text.clone();
            let mut edit = edits[i].text.clone();
            let mut eq2 = edits[i + 1].text.clone();

            // Slide left as far as the texts allow.
            let shift = common_suffix_str(&eq1, &edit);
            if shift > 0 {
                let eq1_chars = eq1.chars().count();
                let edit_chars = edit.chars().count();
                let (eq1_head, moved) = split_chars(&eq1, eq1_chars - shift);
                let moved = moved.to_string();
                let eq1_head = eq1_head.to_string();
                let (edit_head, _) = split_chars(&edit, edit_chars - shift);
                edit = format!("{}{}", moved, edit_head);
                eq1 = eq1_head;
                eq2 = format!("{}{}", moved, eq2);
            }

            // Then walk right, keeping the highest-scoring split.
            let mut best = (eq1.clone(), edit.clone(), eq2.clone());
            let mut best_score = boundary_score(&eq1, &edit) + boundary_score(&edit, &eq2);
            while let (Some(e_first), Some(q_first)) = (edit.chars().next(), eq2.chars().next()) {
                if e_first != q_first {
                    break;
                }
                eq1.push(e_first);
                let (_, rest) = split_chars(&edit, 1);
                edit = format!("{}{}", rest, q_first);
                let (_, rest) = split_chars(&eq2, 1);
                eq2 = rest.to_string();
                let score = boundary_score(&eq1, &edit) + boundary_score(&edit, &eq2);
                if score >= best_score {
                    best_score = score;
                    best = (eq1.clone(), edit.clone(), eq2.clone());
                }
            }

            if edits[i - 1].text != best.0 {
                edits[i - 1].text = best.0;
                edits[i].text = best.1;
                edits[i + 1].text = best.2;
                // Either flank can shrink to nothing.
                if edits[i + 1].text.is_empty() {
                    edits.remove(i + 1);
                }
                if edits[i - 1].text.is_empty() {
                    edits.remove(i - 1);
                    i = i.saturating_sub(1);
                }
            }
        }
        i += 1;
    }
    edits
}

/// Score how natural a split between `one` and `two` is. Higher is better:
/// 6 at a text edge, 5 at a blank line, 4 at a line break, 3 after sentence
/// punctuation, 2 at whitespace, 1 at non-alphanumeric, 0 mid-word.
fn boundary_score(one: &str, two: &str) -> u32 {
    let Some(char1) = one.chars().next_back() else {
        return 6;
    };
    let Some(char2) = two.chars().next() else {
        return 6;
    };

    let non_alnum1 = !char1.is_alphanumeric();
    let non_alnum2 = !char2.is_alphanumeric();
    let space1 = non_alnum1 && char1.is_whitespace();
    let space2 = non_alnum2 && char2.is_whitespace();
    let line1 = space1 && (char1 == '\n' || char1 == '\r');
    let line2 = space2 && (char2 == '\n' || char2 == '\r');
    let blank1 = line1 && (one.ends_with("\n\n") || one.ends_with("\n\r\n"));
    let blank2 = line2 && (two.starts_with("\n\n") || two.starts_with("\r\n\r\n") || two.starts_with("\r\n\n") || two.starts_with("\n\r\n"));

    if blank1 || blank2 {
        5
    } else if line1 || line2 {
        4
    } else if non_alnum1 && !space1 && space2 {
        3
    } else if space1 || space2 {
        2
    } else if non_alnum1 || non_alnum2 {
        1
    } else {
        0
    }
}
