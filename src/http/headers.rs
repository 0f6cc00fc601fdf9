use crate::errors::ParseError;

/// Header names that may appear once; a repeated value replaces the earlier one.
const SINGULAR: [&str; 7] = [
    "content-length",
    "content-type",
    "host",
    "server",
    "date",
    "authorization",
    "user-agent",
];

/// Ordered, case-insensitive multimap of header fields.
///
/// Names keep the spelling they were added with; lookups ignore ASCII case.
///
/// # Examples
/// ```
/// use maker_h1::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.append("Accept", "text/html");
/// headers.append("accept", "application/json");
/// headers.append("Host", "a.example");
/// headers.append("host", "b.example");
///
/// assert_eq!(headers.get_all("ACCEPT").count(), 2);
/// assert_eq!(headers.get("Host"), Some("b.example"));
/// assert!(!headers.put_if_absent("HOST", "c.example"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a field; singular fields such as `host` or `content-length` are replaced instead.
    pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();

        match SINGULAR.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
            true => self.insert(name, value),
            false => self.entries.push((name, value.into())),
        }
    }

    /// Replaces every value of `name` with one, keeping the position of the first.
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0;
                self.entries.retain(|(n, _)| {
                    if !n.eq_ignore_ascii_case(&name) {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Adds the field only if no field with that name exists. Returns whether it was added.
    pub fn put_if_absent<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> bool {
        let name = name.into();

        if self.position(&name).is_some() {
            return false;
        }

        self.entries.push((name, value.into()));
        true
    }

    /// Removes every field called `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Whether any comma-separated element of any `name` field equals `token`,
    /// ignoring case, e.g. `close` in `Connection: keep-alive, Close`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    pub(crate) fn content_length(&self) -> Result<Option<u64>, ParseError> {
        match self.get("content-length") {
            None => Ok(None),
            Some(value) => slice_to_u64(value.as_bytes())
                .map(Some)
                .ok_or(ParseError::InvalidContentLength),
        }
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

#[inline(always)]
pub(crate) fn slice_to_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: u64 = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as u64)?;
    }

    Some(result)
}
