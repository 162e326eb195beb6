//! `rusqlite` bindings.
//!
//! Identifiers are stored as 16-byte BLOBs, enums as their lowercase labels.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use uuid::Uuid;

use crate::{
    GroupId, OwnerOrigin, PrincipalKind, ResourceId, ResourceKind, ShareId, UserId, Visibility,
};

fn uuid_from_sql(value: ValueRef<'_>) -> FromSqlResult<Uuid> {
    let bytes = value.as_blob()?;
    Uuid::from_slice(bytes).map_err(|e| FromSqlError::Other(Box::new(e)))
}

macro_rules! sql_id {
    ($($name:ident),+) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.0.as_bytes().as_slice()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    uuid_from_sql(value).map($name)
                }
            }
        )+
    };
}

macro_rules! sql_label {
    ($($name:ident),+) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_id!(UserId, GroupId, ResourceId, ShareId);
sql_label!(ResourceKind, Visibility, PrincipalKind, OwnerOrigin);

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    #[test]
    fn test_id_and_label_columns() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id BLOB NOT NULL, kind TEXT NOT NULL)")
            .expect("create");

        let id = GroupId::random();
        conn.execute(
            "INSERT INTO t (id, kind) VALUES (?1, ?2)",
            rusqlite::params![id, PrincipalKind::Group],
        )
        .expect("insert");

        let (read_id, kind): (GroupId, PrincipalKind) = conn
            .query_row("SELECT id, kind FROM t", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .expect("select");
        assert_eq!(read_id, id);
        assert_eq!(kind, PrincipalKind::Group);

        let len: i64 = conn
            .query_row("SELECT length(id) FROM t", [], |row| row.get(0))
            .expect("length");
        assert_eq!(len, 16);
    }

    #[test]
    fn test_unknown_label_is_conversion_error() {
        let conn = Connection::open_in_memory().expect("open");
        let result: rusqlite::Result<Visibility> =
            conn.query_row("SELECT 'hidden'", [], |row| row.get(0));
        assert!(matches!(
            result,
            Err(rusqlite::Error::FromSqlConversionFailure(..))
        ));
    }
}
