use std::fmt::{
    self,
    Debug,
    Formatter,
};

/// A text buffer with a fixed capacity that lives on the stack.
/// Writes that do not fit are cut off at the last whole character.
pub(crate) struct FixedBuf<const N: usize> {
    inner: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> FixedBuf<N> {
    pub(crate) fn new() -> Self {
        Self {
            inner: [0; N],
            len: 0,
            truncated: false,
        }
    }

    pub(crate) fn push_str(&mut self, s: &str) {
        let room = N - self.len;
        let mut end = s.len().min(room);

        while !s.is_char_boundary(end) {
            end -= 1;
        }

        if end < s.len() {
            self.truncated = true;
        }

        self.inner[self.len..self.len + end].copy_from_slice(&s.as_bytes()[..end]);
        self.len += end;
    }

    pub(crate) fn as_str(&self) -> &str {
        std::str::from_utf8(&self.inner[..self.len]).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> fmt::Write for FixedBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> Debug for FixedBuf<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FixedBuf({:?})", self.as_str())
    }
}

#[cfg(test)]
#[test]
fn test_truncate() {
    use std::fmt::Write;

    let mut buf = FixedBuf::<8>::new();
    assert!(buf.is_empty());

    write!(buf, "asdf {}", 1234).unwrap();
    assert_eq!(buf.as_str(), "asdf 123");
    assert_eq!(buf.as_str().len(), 8);
    assert!(buf.is_truncated());

    let mut buf = FixedBuf::<4>::new();
    buf.push_str("ab\u{e9}\u{e9}");
    assert_eq!(buf.as_str(), "ab\u{e9}");
}
