//! Column-id scheme and the fixed change-op/doc-op/change-meta schemas: a
//! column id is `groupIndex·8 + type`, where `type` is one of the seven
//! encodings below (a 3-bit, mod-8 type field; no `DEFLATE` type since
//! nothing here needs it).

#![allow(dead_code)]

pub(crate) const COLUMN_TYPE_GROUP_CARD: u32 = 0;
pub(crate) const COLUMN_TYPE_ACTOR_ID: u32 = 1;
pub(crate) const COLUMN_TYPE_INT_RLE: u32 = 2;
pub(crate) const COLUMN_TYPE_INT_DELTA: u32 = 3;
pub(crate) const COLUMN_TYPE_BOOLEAN: u32 = 4;
pub(crate) const COLUMN_TYPE_STRING_RLE: u32 = 5;
pub(crate) const COLUMN_TYPE_VALUE_LEN: u32 = 6;
pub(crate) const COLUMN_TYPE_VALUE_RAW: u32 = 7;

pub(crate) const fn col_id(group: u32, col_type: u32) -> u32 {
    group * 8 + col_type
}

/// Column ids shared by both the change-op and doc-op schemas.
pub(crate) mod op_cols {
    use super::*;

    pub(crate) const OBJ_ACTOR: u32 = col_id(0, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const OBJ_CTR: u32 = col_id(0, COLUMN_TYPE_INT_RLE);

    pub(crate) const KEY_ACTOR: u32 = col_id(1, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const KEY_CTR: u32 = col_id(1, COLUMN_TYPE_INT_DELTA);
    pub(crate) const KEY_STR: u32 = col_id(1, COLUMN_TYPE_STRING_RLE);

    /// Only present in the doc-op schema: the op's own id.
    pub(crate) const ID_ACTOR: u32 = col_id(2, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const ID_CTR: u32 = col_id(2, COLUMN_TYPE_INT_DELTA);

    pub(crate) const INSERT: u32 = col_id(3, COLUMN_TYPE_BOOLEAN);
    pub(crate) const ACTION: u32 = col_id(4, COLUMN_TYPE_INT_RLE);

    pub(crate) const VAL_LEN: u32 = col_id(5, COLUMN_TYPE_VALUE_LEN);
    pub(crate) const VAL_RAW: u32 = col_id(5, COLUMN_TYPE_VALUE_RAW);

    pub(crate) const CHLD_ACTOR: u32 = col_id(6, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const CHLD_CTR: u32 = col_id(6, COLUMN_TYPE_INT_DELTA);

    /// Only present in the change-op schema.
    pub(crate) const PRED_NUM: u32 = col_id(7, COLUMN_TYPE_GROUP_CARD);
    pub(crate) const PRED_ACTOR: u32 = col_id(7, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const PRED_CTR: u32 = col_id(7, COLUMN_TYPE_INT_DELTA);

    /// Only present in the doc-op schema.
    pub(crate) const SUCC_NUM: u32 = col_id(8, COLUMN_TYPE_GROUP_CARD);
    pub(crate) const SUCC_ACTOR: u32 = col_id(8, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const SUCC_CTR: u32 = col_id(8, COLUMN_TYPE_INT_DELTA);
}

/// Per-change metadata columns, concatenated in a document body.
pub(crate) mod change_meta_cols {
    use super::*;

    pub(crate) const ACTOR: u32 = col_id(0, COLUMN_TYPE_ACTOR_ID);
    pub(crate) const SEQ: u32 = col_id(0, COLUMN_TYPE_INT_DELTA);
    pub(crate) const MAX_OP: u32 = col_id(1, COLUMN_TYPE_INT_DELTA);
    pub(crate) const TIME: u32 = col_id(2, COLUMN_TYPE_INT_DELTA);
    pub(crate) const MESSAGE: u32 = col_id(3, COLUMN_TYPE_STRING_RLE);
    pub(crate) const DEPS_NUM: u32 = col_id(4, COLUMN_TYPE_GROUP_CARD);
    pub(crate) const DEPS_INDEX: u32 = col_id(4, COLUMN_TYPE_INT_DELTA);
    pub(crate) const EXTRA_LEN: u32 = col_id(5, COLUMN_TYPE_VALUE_LEN);
    pub(crate) const EXTRA_RAW: u32 = col_id(5, COLUMN_TYPE_VALUE_RAW);
}

/// A raw `(colId, bytes)` entry as read off the wire, before being sorted
/// into named columns. Readers must reject columns out of ascending order.
#[derive(Debug, Clone)]
pub(crate) struct RawColumn {
    pub(crate) id: u32,
    pub(crate) data: Vec<u8>,
}

/// Validates that `cols` are sorted strictly ascending by id, and returns
/// them unchanged if so.
pub(crate) fn check_ascending(
    cols: Vec<RawColumn>,
) -> Result<Vec<RawColumn>, super::encoding::DecodeError> {
    let mut last: Option<u32> = None;
    for col in &cols {
        if let Some(last) = last {
            if col.id <= last {
                return Err(super::encoding::DecodeError::ColumnsOutOfOrder {
                    last,
                    found: col.id,
                });
            }
        }
        last = Some(col.id);
    }
    Ok(cols)
}

/// Looks up a column's bytes by id, treating an absent column as empty: a
/// column whose encoder is empty or all-null is omitted on the wire, and
/// readers synthesize default (null) values for missing columns.
pub(crate) fn find<'a>(cols: &'a [RawColumn], id: u32) -> &'a [u8] {
    cols.iter()
        .find(|c| c.id == id)
        .map(|c| c.data.as_slice())
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_ids_match_schema_table() {
        assert_eq!(op_cols::OBJ_ACTOR, 1);
        assert_eq!(op_cols::OBJ_CTR, 2);
        assert_eq!(op_cols::KEY_STR, 1 * 8 + COLUMN_TYPE_STRING_RLE);
        assert_eq!(op_cols::VAL_LEN, 5 * 8 + COLUMN_TYPE_VALUE_LEN);
        assert_eq!(op_cols::VAL_RAW, 5 * 8 + COLUMN_TYPE_VALUE_RAW);
        assert_eq!(op_cols::PRED_NUM, 7 * 8);
        assert_eq!(op_cols::SUCC_NUM, 8 * 8);
    }

    #[test]
    fn rejects_out_of_order_columns() {
        let cols = vec![
            RawColumn { id: 5, data: vec![] },
            RawColumn { id: 2, data: vec![] },
        ];
        assert!(check_ascending(cols).is_err());
    }

    #[test]
    fn rejects_duplicate_column_ids() {
        let cols = vec![
            RawColumn { id: 2, data: vec![] },
            RawColumn { id: 2, data: vec![] },
        ];
        assert!(check_ascending(cols).is_err());
    }
}
