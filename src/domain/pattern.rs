// PV name pattern expansion
//
// A target may contain parenthesized alternation groups, e.g.
// "PV:(A|B):VAL" expands to ["PV:A:VAL", "PV:B:VAL"]. Groups may nest;
// nested groups surface after the outer substitution and are expanded by
// recursion.

/// Span of a top-level parenthesized phrase in the original string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParenSpan {
    pub phrase: String,
    pub start: usize,
    pub end: usize,
}

pub fn parse_target_pv(target_pv: &str) -> Vec<String> {
    let spans = locate_outer_paren(target_pv);

    if spans.is_empty() {
        return vec![target_pv.to_string()];
    }

    let phrase_parts: Vec<Vec<String>> = spans
        .iter()
        .map(|span| {
            let stripped = &span.phrase[1..span.phrase.len() - 1];
            split_lowest_level_only(stripped)
        })
        .collect();

    let phrase_cases = permute_query(&phrase_parts);

    let mut result: Vec<String> = phrase_cases
        .iter()
        .map(|case| selective_insert(target_pv, &spans, case))
        .collect();

    // Alternatives may expose nested groups; expand those recursively,
    // replacing the partially expanded entry with its expansions at the
    // tail of the list.
    let mut pos = 0;
    while pos < result.len() {
        let expanded = parse_target_pv(&result[pos]);
        if expanded.len() > 1 {
            result.remove(pos);
            result.extend(expanded);
        } else {
            pos += 1;
        }
    }

    result
}

/// Locate maximal top-level parenthesized phrases. Only a closing paren
/// that returns the nesting depth to zero terminates a recorded span.
/// Unbalanced input is not validated; the depth counter runs best-effort.
pub fn locate_outer_paren(data: &str) -> Vec<ParenSpan> {
    let mut spans = Vec::new();
    let mut nest_counter = 0_i32;
    let mut stash_init_pos = 0;

    for (pos, c) in data.char_indices() {
        if c == '(' {
            if nest_counter == 0 {
                stash_init_pos = pos;
            }
            nest_counter += 1;
        } else if c == ')' {
            if nest_counter == 1 {
                spans.push(ParenSpan {
                    phrase: data[stash_init_pos..pos + 1].to_string(),
                    start: stash_init_pos,
                    end: pos + 1,
                });
            }
            nest_counter -= 1;
        }
    }

    spans
}

/// Split on `|` at nesting depth zero only, so alternatives containing
/// nested groups stay intact.
pub fn split_lowest_level_only(data: &str) -> Vec<String> {
    let mut output = Vec::new();
    let mut nest_counter = 0_i32;
    let mut stash_init_pos = 0;

    for (pos, c) in data.char_indices() {
        if c == '(' {
            nest_counter += 1;
        } else if c == ')' {
            nest_counter -= 1;
        }
        if c == '|' && nest_counter == 0 {
            output.push(data[stash_init_pos..pos].to_string());
            stash_init_pos = pos + 1;
        }
    }
    output.push(data[stash_init_pos..].to_string());

    output
}

/// Cartesian product of the alternative lists, preserving span order:
/// [[a,b],[c,d]] -> [[a,c],[a,d],[b,c],[b,d]].
pub fn permute_query(input: &[Vec<String>]) -> Vec<Vec<String>> {
    input.iter().fold(Vec::new(), |permuted, push_strings| {
        if permuted.is_empty() {
            return push_strings.iter().map(|s| vec![s.clone()]).collect();
        }

        permuted
            .iter()
            .flat_map(|prefix| {
                push_strings.iter().map(|s| {
                    let mut case = prefix.clone();
                    case.push(s.clone());
                    case
                })
            })
            .collect()
    })
}

/// Rebuild the original string with each span replaced by its chosen
/// alternative. Spans are non-overlapping and in increasing order, so a
/// single left-to-right pass suffices.
pub fn selective_insert(input: &str, spans: &[ParenSpan], inserts: &[String]) -> String {
    if spans.len() != inserts.len() {
        return String::new();
    }

    let mut output = String::new();
    let mut prev_idx = 0;

    for (span, insert) in spans.iter().zip(inserts) {
        output.push_str(&input[prev_idx..span.start]);
        output.push_str(insert);
        prev_idx = span.end;
    }

    if prev_idx < input.len() {
        output.push_str(&input[prev_idx..]);
    }

    output
}
