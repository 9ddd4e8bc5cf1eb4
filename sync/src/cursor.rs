/// Pagination bookkeeping for a single scope.
///
/// `in_flight` is the only mutual-exclusion mechanism for a scope: while it is
/// set, [`FetchCursor::try_begin`] refuses to hand out another offset, so at
/// most one page request exists per cursor at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCursor {
    pub next_offset: usize,
    pub exhausted: bool,
    pub in_flight: bool,
}

impl FetchCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    pub fn can_fetch(&self) -> bool {
        !self.exhausted && !self.in_flight
    }

    /// Claims the cursor for one request and returns the offset to request.
    /// Returns `None` when the cursor is exhausted or already claimed.
    pub fn try_begin(&mut self) -> Option<usize> {
        if !self.can_fetch() {
            return None;
        }
        self.in_flight = true;
        Some(self.next_offset)
    }

    /// Records a successful page of `received` items.
    pub fn complete(&mut self, received: usize, page_size: usize) {
        self.next_offset += page_size;
        self.exhausted = received < page_size;
        self.in_flight = false;
    }

    /// Releases the claim without moving the cursor so the same offset is
    /// requested again on retry.
    pub fn fail(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn second_claim_is_refused_while_in_flight() {
        let mut cursor = FetchCursor::new();
        assert_eq!(cursor.try_begin(), Some(0));
        assert_eq!(cursor.try_begin(), None);

        cursor.complete(20, 20);
        assert_eq!(cursor.try_begin(), Some(20));
    }

    #[test]
    fn short_page_exhausts() {
        let mut cursor = FetchCursor::new();
        cursor.try_begin();
        cursor.complete(20, 20);
        assert!(cursor.has_more());

        cursor.try_begin();
        cursor.complete(7, 20);
        assert_eq!(
            cursor,
            FetchCursor {
                next_offset: 40,
                exhausted: true,
                in_flight: false,
            }
        );
        assert_eq!(cursor.try_begin(), None);
    }

    #[test]
    fn failure_keeps_offset() {
        let mut cursor = FetchCursor::new();
        cursor.try_begin();
        cursor.complete(10, 10);

        assert_eq!(cursor.try_begin(), Some(10));
        cursor.fail();
        assert!(!cursor.in_flight);
        assert!(!cursor.exhausted);
        assert_eq!(cursor.try_begin(), Some(10));
    }
}
