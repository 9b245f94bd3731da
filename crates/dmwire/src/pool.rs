//! Reuse of server-side statement handles.
//!
//! Closing a statement while the pool has room parks its handle here
//! instead of freeing it on the server; the next prepare takes it back.

/// A parked server statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledStatement {
    pub id: i32,
    pub cursor_name: Option<String>,
    pub read_base_col_name: bool,
}

#[derive(Debug, Default)]
pub struct StatementPool {
    entries: Vec<PooledStatement>,
    capacity: usize,
}

impl StatementPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Park a handle. A full pool hands it back so the caller can free it.
    pub fn push(&mut self, entry: PooledStatement) -> Result<(), PooledStatement> {
        if !self.has_room() {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<PooledStatement> {
        self.entries.pop()
    }

    /// Take every parked handle, leaving the pool empty.
    pub fn drain(&mut self) -> Vec<PooledStatement> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i32) -> PooledStatement {
        PooledStatement {
            id,
            cursor_name: None,
            read_base_col_name: false,
        }
    }

    #[test]
    fn test_push_until_full() {
        let mut pool = StatementPool::new(2);
        assert!(pool.push(entry(1)).is_ok());
        assert!(pool.push(entry(2)).is_ok());
        assert_eq!(pool.push(entry(3)), Err(entry(3)));
        assert_eq!(pool.len(), 2);
        assert!(!pool.has_room());
    }

    #[test]
    fn test_pop_returns_latest() {
        let mut pool = StatementPool::new(4);
        pool.push(entry(1)).unwrap();
        pool.push(PooledStatement {
            id: 2,
            cursor_name: Some("C2".to_string()),
            read_base_col_name: true,
        })
        .unwrap();
        let top = pool.pop().unwrap();
        assert_eq!(top.id, 2);
        assert_eq!(top.cursor_name.as_deref(), Some("C2"));
        assert_eq!(pool.pop().map(|e| e.id), Some(1));
        assert!(pool.pop().is_none());
    }

    #[test]
    fn test_drain_empties() {
        let mut pool = StatementPool::new(3);
        pool.push(entry(5)).unwrap();
        pool.push(entry(6)).unwrap();
        let drained: Vec<i32> = pool.drain().into_iter().map(|e| e.id).collect();
        assert_eq!(drained, vec![5, 6]);
        assert!(pool.is_empty());
        assert!(pool.has_room());
    }

    #[test]
    fn test_zero_capacity_never_parks() {
        let mut pool = StatementPool::new(0);
        assert!(pool.push(entry(1)).is_err());
    }
}
