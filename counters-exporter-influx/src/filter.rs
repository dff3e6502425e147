use crate::source::CounterPoint;

/// Selects which counter points are listed and exported.
///
/// Patterns are shell-style globs matched against the fully-qualified field name (see
/// [`CounterPoint::qualified_name`]): `*` matches any run of characters, and `?` matches exactly one character.
/// Patterns starting with `^` are exclusions.
///
/// A point is selected when it matches no exclusion and, if any inclusion patterns were given, matches at least one of
/// them. An empty filter selects everything.
#[derive(Clone, Debug, Default)]
pub struct FieldFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FieldFilter {
    /// Creates a [`FieldFilter`] from an existing set of patterns.
    pub fn from_patterns<P, I>(patterns: P) -> Self
    where
        P: IntoIterator<Item = I>,
        I: AsRef<str>,
    {
        let mut filter = FieldFilter::default();
        for pattern in patterns {
            filter.add_pattern(pattern);
        }
        filter
    }

    /// Adds a pattern.
    pub fn add_pattern<P>(&mut self, pattern: P) -> &mut FieldFilter
    where
        P: AsRef<str>,
    {
        let pattern = pattern.as_ref();
        match pattern.strip_prefix('^') {
            Some(exclusion) => self.exclude.push(exclusion.to_string()),
            None => self.include.push(pattern.to_string()),
        }
        self
    }

    /// Returns `true` if the filter has no patterns.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Returns `true` if the given fully-qualified field name is selected.
    pub fn matches_name(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| glob_match(p, name)) {
            return false;
        }

        self.include.is_empty() || self.include.iter().any(|p| glob_match(p, name))
    }

    /// Returns `true` if the given point is selected.
    pub fn matches(&self, point: &CounterPoint) -> bool {
        self.is_empty() || self.matches_name(&point.qualified_name())
    }
}

// Iterative wildcard matching with single-star backtracking.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern = pattern.as_bytes();
    let name = name.as_bytes();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == b'?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    backtrack = Some((star_p, star_n + 1));
                    p = star_p + 1;
                    n = star_n + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
