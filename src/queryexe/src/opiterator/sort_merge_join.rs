use super::{not_open_err, ExternalSort, OpIterator};
use common::config::validate_buffers;
use common::error::c_err;
use common::{Batch, ExecConfig, QueryError, TableSchema, Tuple};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Equality predicate `left = right` between one attribute of each input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    /// Attribute name in the left schema, `table.column` or `column`.
    pub left: String,
    /// Attribute name in the right schema.
    pub right: String,
}

impl JoinCondition {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

/// Inputs of a join as chosen by the planner.
pub struct JoinDescriptor {
    pub left: Box<dyn OpIterator>,
    pub right: Box<dyn OpIterator>,
    pub conditions: Vec<JoinCondition>,
    /// Buffer pages available to the join.
    pub num_buffers: usize,
}

/// Sort-merge equi-join.
///
/// Both inputs are sorted ascending on their join keys by an owned
/// [`ExternalSort`], then merged with two cursors. Right tuples sharing a key
/// are buffered as a band so that every left tuple with that key is paired
/// with all of them, even when the band spans several right pages.
pub struct SortMergeJoin {
    // Parameters (No need to reset on close)
    schema: TableSchema,
    left_key: Vec<usize>,
    right_key: Vec<usize>,
    num_buffers: usize,
    page_size: usize,
    left_sort: ExternalSort,
    right_sort: ExternalSort,

    // States (Need to reset on close)
    open: bool,
    /// Tuples per output page.
    batch_size: usize,
    left_batch: Option<Batch>,
    left_cursor: usize,
    right_batch: Option<Batch>,
    right_cursor: usize,
    /// Right tuples of the current band, all with the same key.
    backup: Vec<Tuple>,
    /// Position in `backup` of the next pairing for the current left tuple.
    /// None while the cursors are searching for equal keys.
    saved_cursor: Option<usize>,
    eos: bool,
}

impl SortMergeJoin {
    /// Create a sort-merge join over the inputs of `join`.
    ///
    /// Condition attributes are resolved against the child schemas here; an
    /// unknown attribute or an empty condition list is a `ValidationError`.
    pub fn new(config: &ExecConfig, join: JoinDescriptor) -> Result<Self, QueryError> {
        if join.conditions.is_empty() {
            return Err(QueryError::ValidationError(
                "Sort-merge join needs at least one equality condition".to_string(),
            ));
        }
        let left_schema = join.left.get_schema().clone();
        let right_schema = join.right.get_schema().clone();
        let mut left_key = Vec::with_capacity(join.conditions.len());
        let mut right_key = Vec::with_capacity(join.conditions.len());
        for cond in &join.conditions {
            left_key.push(resolve(&left_schema, &cond.left)?);
            right_key.push(resolve(&right_schema, &cond.right)?);
        }

        let sort_config = ExecConfig {
            num_buffers: join.num_buffers,
            ..config.clone()
        };
        let left_sort = ExternalSort::new(&sort_config, "left", join.left, left_key.clone(), false);
        let right_sort =
            ExternalSort::new(&sort_config, "right", join.right, right_key.clone(), false);

        Ok(Self {
            schema: left_schema.merge(&right_schema),
            left_key,
            right_key,
            num_buffers: join.num_buffers,
            page_size: config.page_size,
            left_sort,
            right_sort,
            open: false,
            batch_size: 0,
            left_batch: None,
            left_cursor: 0,
            right_batch: None,
            right_cursor: 0,
            backup: Vec::new(),
            saved_cursor: None,
            eos: false,
        })
    }

    fn left_tuple(&self) -> Option<&Tuple> {
        self.left_batch.as_ref().and_then(|b| b.get(self.left_cursor))
    }

    fn right_tuple(&self) -> Option<&Tuple> {
        self.right_batch.as_ref().and_then(|b| b.get(self.right_cursor))
    }

    fn advance_left(&mut self) -> Result<(), QueryError> {
        self.left_cursor += 1;
        while let Some(batch) = &self.left_batch {
            if self.left_cursor < batch.len() {
                break;
            }
            self.left_batch = self.left_sort.next()?;
            self.left_cursor = 0;
        }
        Ok(())
    }

    fn advance_right(&mut self) -> Result<(), QueryError> {
        self.right_cursor += 1;
        while let Some(batch) = &self.right_batch {
            if self.right_cursor < batch.len() {
                break;
            }
            self.right_batch = self.right_sort.next()?;
            self.right_cursor = 0;
        }
        Ok(())
    }

    /// Move every right tuple equal to the current one into `backup`,
    /// pulling further right pages as needed.
    fn fill_band(&mut self) -> Result<(), QueryError> {
        let first = self
            .right_tuple()
            .cloned()
            .ok_or_else(|| c_err("No right tuple to start a band"))?;
        self.backup.clear();
        self.backup.push(first);
        self.advance_right()?;
        while let Some(r) = self.right_tuple() {
            if Tuple::compare(r, &self.backup[0], &self.right_key, &self.right_key)
                != Ordering::Equal
            {
                break;
            }
            let r = r.clone();
            self.backup.push(r);
            self.advance_right()?;
        }
        trace!("band of {} right tuples", self.backup.len());
        Ok(())
    }

    fn reset_state(&mut self) {
        self.left_batch = None;
        self.left_cursor = 0;
        self.right_batch = None;
        self.right_cursor = 0;
        self.backup.clear();
        self.saved_cursor = None;
    }
}

fn resolve(schema: &TableSchema, name: &str) -> Result<usize, QueryError> {
    schema.get_field_index(name).ok_or_else(|| {
        QueryError::ValidationError(format!("Join attribute {} not found in {}", name, schema))
    })
}

impl OpIterator for SortMergeJoin {
    fn open(&mut self) -> Result<(), QueryError> {
        if self.open {
            return Ok(());
        }
        validate_buffers(self.num_buffers)?;
        self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
        self.left_sort.open()?;
        if let Err(e) = self.right_sort.open() {
            let _ = self.left_sort.close();
            return Err(e);
        }
        self.reset_state();
        self.left_batch = self.left_sort.next()?;
        self.right_batch = self.right_sort.next()?;
        self.eos = false;
        self.open = true;
        debug!(
            "sort-merge join open: {} tuples per output page, keys {:?} = {:?}",
            self.batch_size, self.left_key, self.right_key
        );
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Batch>, QueryError> {
        if !self.open {
            return Err(not_open_err());
        }
        if self.eos {
            return Ok(None);
        }
        let mut out = Batch::new(self.batch_size);
        loop {
            if let Some(pos) = self.saved_cursor {
                if pos < self.backup.len() {
                    let left = self
                        .left_tuple()
                        .ok_or_else(|| c_err("Band scan without a left tuple"))?;
                    let joined = left.merge(&self.backup[pos]);
                    self.saved_cursor = Some(pos + 1);
                    out.push(joined)
                        .map_err(|_| c_err("Join output page overflow"))?;
                    if out.is_full() {
                        return Ok(Some(out));
                    }
                    continue;
                }
                // Band done for this left tuple; the next one may share its key.
                self.saved_cursor = None;
                self.advance_left()?;
                if let Some(left) = self.left_tuple() {
                    if Tuple::compare(left, &self.backup[0], &self.left_key, &self.right_key)
                        == Ordering::Equal
                    {
                        self.saved_cursor = Some(0);
                        continue;
                    }
                }
                self.backup.clear();
                continue;
            }

            let ord = match (self.left_tuple(), self.right_tuple()) {
                (Some(l), Some(r)) => Tuple::compare(l, r, &self.left_key, &self.right_key),
                _ => break,
            };
            match ord {
                Ordering::Less => self.advance_left()?,
                Ordering::Greater => self.advance_right()?,
                Ordering::Equal => {
                    self.fill_band()?;
                    self.saved_cursor = Some(0);
                }
            }
        }

        // One side is exhausted and no band is pending.
        self.eos = true;
        debug!("sort-merge join reached end of stream");
        self.reset_state();
        self.left_sort.close()?;
        self.right_sort.close()?;
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn close(&mut self) -> Result<(), QueryError> {
        self.reset_state();
        let left = self.left_sort.close();
        let right = self.right_sort.close();
        self.open = false;
        self.eos = false;
        left.and(right)
    }

    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{
        count_dir_entries, execute_iter, join_oracle, test_config, tuple_source, TestTuples,
    };
    use common::datatypes::{f_int, f_str};
    use common::testutil::{gen_test_tuples, get_int_table_schema, get_test_tuple_schema};
    use common::{Attribute, DataType, Field};

    fn kv_schema(table: &str) -> TableSchema {
        TableSchema::new(vec![
            Attribute::new(table, "k", DataType::Int),
            Attribute::new(table, "v", DataType::String(4)),
        ])
    }

    fn kv(k: i64, v: &str) -> Tuple {
        Tuple::new(vec![f_int(k), f_str(v)])
    }

    fn get_join(
        config: &ExecConfig,
        left: (Vec<Tuple>, TableSchema),
        right: (Vec<Tuple>, TableSchema),
        conditions: Vec<JoinCondition>,
    ) -> Result<SortMergeJoin, QueryError> {
        let desc = JoinDescriptor {
            left: tuple_source(left.0, left.1, config.page_size),
            right: tuple_source(right.0, right.1, config.page_size),
            conditions,
            num_buffers: config.num_buffers,
        };
        SortMergeJoin::new(config, desc)
    }

    fn kv_join(config: &ExecConfig, left: Vec<Tuple>, right: Vec<Tuple>) -> SortMergeJoin {
        get_join(
            config,
            (left, kv_schema("l")),
            (right, kv_schema("r")),
            vec![JoinCondition::new("l.k", "r.k")],
        )
        .unwrap()
    }

    mod sort_merge_join_test {
        use super::*;

        #[test]
        fn test_join_test_tuples() {
            // Joining two tables each containing the following tuples:
            // 1 1 3 E
            // 2 1 3 G
            // 3 1 4 A
            // 4 2 4 G
            // 5 2 5 G
            // 6 2 5 G

            // left.a == right.c

            // Output:
            // 3 1 4 A 1 1 3 E
            // 3 1 4 A 2 1 3 G
            // 4 2 4 G 3 1 4 A
            // 4 2 4 G 4 2 4 G
            // 5 2 5 G 5 2 5 G
            // 5 2 5 G 6 2 5 G
            let (config, _dir) = test_config(64, 3);
            let left = TestTuples::new("left");
            let right = TestTuples::new("right");
            let mut join = get_join(
                &config,
                (left.tuples.clone(), left.schema),
                (right.tuples.clone(), right.schema),
                vec![JoinCondition::new("left.a", "right.c")],
            )
            .unwrap();
            let t = execute_iter(&mut join, true).unwrap();
            assert_eq!(t.len(), 6);
            assert_eq!(t[0], left.tuples[2].merge(&right.tuples[0]));
            assert_eq!(t[1], left.tuples[2].merge(&right.tuples[1]));
            assert_eq!(t[2], left.tuples[3].merge(&right.tuples[2]));
            assert_eq!(t[3], left.tuples[3].merge(&right.tuples[3]));
            assert_eq!(t[4], left.tuples[4].merge(&right.tuples[4]));
            assert_eq!(t[5], left.tuples[4].merge(&right.tuples[5]));
            assert_eq!(join.get_schema().size(), 8);
        }

        #[test]
        fn test_band_scan_across_pages() {
            // 8 byte inputs, 2 tuples per input page and 1 per output page.
            let (config, _dir) = test_config(16, 3);
            let mut join = kv_join(
                &config,
                vec![kv(1, "a")],
                vec![kv(1, "x"), kv(1, "y"), kv(1, "z")],
            );
            let t = execute_iter(&mut join, false).unwrap();
            assert_eq!(
                t,
                vec![
                    Tuple::new(vec![f_int(1), f_str("a"), f_int(1), f_str("x")]),
                    Tuple::new(vec![f_int(1), f_str("a"), f_int(1), f_str("y")]),
                    Tuple::new(vec![f_int(1), f_str("a"), f_int(1), f_str("z")]),
                ]
            );
        }

        #[test]
        fn test_duplicates_on_both_sides() {
            let (config, _dir) = test_config(16, 3);
            let left = vec![kv(2, "p"), kv(1, "a"), kv(1, "b"), kv(3, "q"), kv(1, "c")];
            let right = vec![kv(1, "x"), kv(0, "n"), kv(1, "y"), kv(3, "r"), kv(3, "s")];
            let mut join = kv_join(&config, left.clone(), right.clone());
            let t = execute_iter(&mut join, true).unwrap();
            // 3 x 2 for key 1, 1 x 2 for key 3.
            assert_eq!(t.len(), 8);
            assert_eq!(t, join_oracle(&left, &right, &[0], &[0]));
        }

        #[test]
        fn test_empty_right_input() {
            let (config, dir) = test_config(16, 3);
            let mut join = kv_join(&config, vec![kv(1, "a"), kv(2, "b")], vec![]);
            join.open().unwrap();
            assert_eq!(join.next().unwrap(), None);
            join.close().unwrap();
            assert_eq!(count_dir_entries(&dir), 0);
        }

        #[test]
        fn test_empty_left_input() {
            let (config, _dir) = test_config(16, 3);
            let mut join = kv_join(&config, vec![], vec![kv(1, "a")]);
            assert!(execute_iter(&mut join, false).unwrap().is_empty());
            join.close().unwrap();
        }

        #[test]
        fn test_no_matching_keys() {
            let (config, _dir) = test_config(16, 3);
            let mut join = kv_join(
                &config,
                vec![kv(1, "a"), kv(3, "b"), kv(5, "c")],
                vec![kv(0, "x"), kv(2, "y"), kv(4, "z"), kv(6, "w")],
            );
            assert!(execute_iter(&mut join, false).unwrap().is_empty());
        }

        #[test]
        fn test_multiple_conditions() {
            let (config, _dir) = test_config(64, 4);
            let left = vec![
                Tuple::new(vec![f_int(1), f_int(1), f_int(10)]),
                Tuple::new(vec![f_int(1), f_int(2), f_int(11)]),
                Tuple::new(vec![f_int(2), f_int(1), f_int(12)]),
            ];
            let right = vec![
                Tuple::new(vec![f_int(2), f_int(1)]),
                Tuple::new(vec![f_int(1), f_int(1)]),
                Tuple::new(vec![f_int(1), f_int(1)]),
            ];
            let mut join = get_join(
                &config,
                (left.clone(), get_int_table_schema("l", 3)),
                (right.clone(), get_int_table_schema("r", 2)),
                vec![
                    JoinCondition::new("l.c1", "r.c0"),
                    JoinCondition::new("l.c0", "r.c1"),
                ],
            )
            .unwrap();
            let t = execute_iter(&mut join, true).unwrap();
            assert_eq!(t, join_oracle(&left, &right, &[1, 0], &[0, 1]));
            assert_eq!(t.len(), 3);
        }

        #[test]
        fn test_random_join_matches_oracle() {
            // 16 byte tuples, 2 per input page; output pages hold one tuple.
            let (config, _dir) = test_config(32, 3);
            let left = gen_test_tuples(150, 25);
            let right = gen_test_tuples(120, 25);
            let mut join = get_join(
                &config,
                (left.clone(), get_test_tuple_schema("l")),
                (right.clone(), get_test_tuple_schema("r")),
                vec![JoinCondition::new("l.id", "r.id")],
            )
            .unwrap();
            let t = execute_iter(&mut join, true).unwrap();
            assert_eq!(t, join_oracle(&left, &right, &[0], &[0]));
        }

        #[test]
        fn test_output_pages_are_bounded() {
            // Output tuples are 16 bytes, 3 per 48 byte page.
            let (config, _dir) = test_config(48, 3);
            let left: Vec<Tuple> = (0..4).map(|i| kv(i % 2, "l")).collect();
            let right: Vec<Tuple> = (0..5).map(|i| kv(i % 2, "r")).collect();
            let mut join = kv_join(&config, left, right);
            join.open().unwrap();
            let mut total = 0;
            while let Some(batch) = join.next().unwrap() {
                assert!(batch.len() <= 3);
                assert!(!batch.is_empty());
                total += batch.len();
            }
            // 2 x 3 for key 0 and 2 x 2 for key 1.
            assert_eq!(total, 10);
        }

        #[test]
        fn test_string_keys() {
            let (config, _dir) = test_config(64, 3);
            let mut join = get_join(
                &config,
                (vec![kv(1, "b"), kv(2, "a")], kv_schema("l")),
                (vec![kv(9, "a"), kv(8, "c")], kv_schema("r")),
                vec![JoinCondition::new("l.v", "r.v")],
            )
            .unwrap();
            let t = execute_iter(&mut join, false).unwrap();
            assert_eq!(
                t,
                vec![Tuple::new(vec![f_int(2), f_str("a"), f_int(9), f_str("a")])]
            );
            let fields: Vec<&Field> = t[0].field_vals().collect();
            assert_eq!(fields.len(), 4);
        }
    }

    mod config_test {
        use super::*;

        #[test]
        fn test_page_smaller_than_output_tuple() {
            // Inputs fit (8 bytes) but the joined tuple (16 bytes) does not.
            let (config, _dir) = test_config(12, 3);
            let mut join = kv_join(&config, vec![kv(1, "a")], vec![kv(1, "b")]);
            assert!(matches!(join.open(), Err(QueryError::ConfigError(_))));
            join.close().unwrap();
        }

        #[test]
        fn test_too_few_buffers() {
            let (config, _dir) = test_config(64, 2);
            let mut join = kv_join(&config, vec![kv(1, "a")], vec![kv(1, "b")]);
            assert!(matches!(join.open(), Err(QueryError::ConfigError(_))));
        }

        #[test]
        fn test_unknown_attribute() {
            let (config, _dir) = test_config(64, 3);
            let res = get_join(
                &config,
                (vec![], kv_schema("l")),
                (vec![], kv_schema("r")),
                vec![JoinCondition::new("l.k", "r.missing")],
            );
            assert!(matches!(res, Err(QueryError::ValidationError(_))));
        }

        #[test]
        fn test_no_conditions() {
            let (config, _dir) = test_config(64, 3);
            let res = get_join(&config, (vec![], kv_schema("l")), (vec![], kv_schema("r")), vec![]);
            assert!(matches!(res, Err(QueryError::ValidationError(_))));
        }
    }

    mod opiterator_test {
        use super::*;

        #[test]
        fn test_next_not_open() {
            let (config, _dir) = test_config(64, 3);
            let mut join = kv_join(&config, vec![kv(1, "a")], vec![kv(1, "b")]);
            assert!(join.next().is_err());
        }

        #[test]
        fn test_close() {
            let (config, dir) = test_config(16, 3);
            let mut join = kv_join(&config, vec![kv(1, "a")], vec![kv(1, "b"), kv(1, "c")]);
            join.open().unwrap();
            assert_eq!(count_dir_entries(&dir), 2);
            assert!(join.next().unwrap().is_some());
            join.close().unwrap();
            assert_eq!(count_dir_entries(&dir), 0);
            join.close().unwrap();
        }

        #[test]
        fn test_next_after_end() {
            let (config, _dir) = test_config(16, 3);
            let mut join = kv_join(&config, vec![kv(1, "a")], vec![kv(1, "b")]);
            execute_iter(&mut join, false).unwrap();
            assert_eq!(join.next().unwrap(), None);
            assert_eq!(join.next().unwrap(), None);
        }

        #[test]
        fn test_reopen_after_close() {
            let (config, _dir) = test_config(16, 3);
            let left = vec![kv(1, "a"), kv(2, "b"), kv(2, "c")];
            let right = vec![kv(2, "x"), kv(1, "y")];
            let mut join = kv_join(&config, left, right);
            let t_before = execute_iter(&mut join, false).unwrap();
            join.close().unwrap();
            let t_after = execute_iter(&mut join, false).unwrap();
            assert_eq!(t_before, t_after);
            assert_eq!(t_before.len(), 3);
        }
    }
}
