//! User-visible view over a merged record stream

use super::MergeIterator;
use crate::{Result, SequenceNumber};
use bytes::Bytes;

/// Yields the newest visible value of each user key below `end`.
///
/// Versions newer than `read_seq` are invisible, older versions of a key
/// are shadowed by the first visible one, and keys whose visible version is
/// a tombstone are skipped.
pub struct DbIterator {
    inner: MergeIterator,
    read_seq: SequenceNumber,
    end: Option<Bytes>,
    last_key: Option<Bytes>,
    done: bool,
}

impl DbIterator {
    pub fn new(inner: MergeIterator, read_seq: SequenceNumber, end: Option<Bytes>) -> Self {
        Self {
            inner,
            read_seq,
            end,
            last_key: None,
            done: false,
        }
    }
}

impl Iterator for DbIterator {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if matches!(&self.end, Some(end) if record.key >= *end) {
                self.done = true;
                return None;
            }
            if record.seq > self.read_seq {
                continue;
            }
            if self.last_key.as_ref() == Some(&record.key) {
                continue;
            }

            self.last_key = Some(record.key.clone());
            if record.is_tombstone() {
                continue;
            }
            return Some(Ok((record.key, record.value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::RecordIter;
    use crate::Record;

    fn merged(sources: Vec<Vec<Record>>) -> MergeIterator {
        MergeIterator::new(
            sources
                .into_iter()
                .map(|s| Box::new(s.into_iter().map(Ok)) as RecordIter)
                .collect(),
        )
    }

    fn collect(iter: DbIterator) -> Vec<(String, String)> {
        iter.map(|r| {
            let (k, v) = r.unwrap();
            (
                String::from_utf8(k.to_vec()).unwrap(),
                String::from_utf8(v.to_vec()).unwrap(),
            )
        })
        .collect()
    }

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_newest_visible_version_wins() {
        let inner = merged(vec![
            vec![Record::put("a", "a3", 3), Record::delete("b", 4)],
            vec![Record::put("a", "a1", 1), Record::put("b", "b2", 2), Record::put("c", "c1", 1)],
        ]);
        let iter = DbIterator::new(inner, u64::MAX, None);
        assert_eq!(collect(iter), vec![pair("a", "a3"), pair("c", "c1")]);
    }

    #[test]
    fn test_read_seq_hides_newer_writes() {
        let inner = merged(vec![
            vec![Record::put("a", "a3", 3), Record::delete("b", 4)],
            vec![Record::put("a", "a1", 1), Record::put("b", "b2", 2)],
        ]);
        let iter = DbIterator::new(inner, 2, None);
        assert_eq!(collect(iter), vec![pair("a", "a1"), pair("b", "b2")]);
    }

    #[test]
    fn test_end_bound_is_exclusive() {
        let inner = merged(vec![vec![
            Record::put("a", "1", 1),
            Record::put("b", "2", 2),
            Record::put("c", "3", 3),
        ]]);
        let iter = DbIterator::new(inner, u64::MAX, Some(Bytes::from("c")));
        assert_eq!(collect(iter), vec![pair("a", "1"), pair("b", "2")]);
    }
}
