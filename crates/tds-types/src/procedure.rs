//! Request builders for the system procedures behind parameterized SQL.

use tds_wire::{ProcId, RpcParam, RpcRequest};

use crate::encode::sql_declaration;
use crate::error::TypeError;
use crate::value::SqlValue;

/// Build an `sp_executesql` call.
///
/// The statement goes first, then the declaration list (only when there are
/// parameters), then the parameters in the given order.
///
/// # Example
///
/// ```rust
/// use tds_types::{SqlValue, execute_sql};
/// use tds_wire::RpcParam;
///
/// let request = execute_sql(
///     "SELECT * FROM users WHERE id = @id",
///     vec![RpcParam::new("@id", SqlValue::Int(42))],
/// )
/// .unwrap();
/// assert_eq!(request.parameters().len(), 3);
/// ```
pub fn execute_sql(
    sql: &str,
    params: Vec<RpcParam<SqlValue>>,
) -> Result<RpcRequest<SqlValue>, TypeError> {
    let mut request =
        RpcRequest::by_id(ProcId::ExecuteSql).param(RpcParam::new("", SqlValue::from(sql)));
    if !params.is_empty() {
        let declarations = param_declarations(&params)?;
        request = request.param(RpcParam::new("", SqlValue::String(declarations)));
    }
    Ok(request.params(params))
}

/// Build an `sp_prepare` call. The server returns the handle in `@handle`.
pub fn prepare(
    sql: &str,
    params: &[RpcParam<SqlValue>],
) -> Result<RpcRequest<SqlValue>, TypeError> {
    Ok(RpcRequest::by_id(ProcId::Prepare)
        .param(RpcParam::output("@handle", SqlValue::Null))
        .param(RpcParam::new(
            "@params",
            SqlValue::String(param_declarations(params)?),
        ))
        .param(RpcParam::new("@stmt", SqlValue::from(sql)))
        .param(RpcParam::new("@options", SqlValue::Int(1))))
}

/// Build an `sp_execute` call for a prepared handle.
#[must_use]
pub fn execute(handle: i32, params: Vec<RpcParam<SqlValue>>) -> RpcRequest<SqlValue> {
    RpcRequest::by_id(ProcId::Execute)
        .param(RpcParam::new("@handle", SqlValue::Int(handle)))
        .params(params)
}

/// Build an `sp_unprepare` call.
#[must_use]
pub fn unprepare(handle: i32) -> RpcRequest<SqlValue> {
    RpcRequest::by_id(ProcId::Unprepare).param(RpcParam::new("@handle", SqlValue::Int(handle)))
}

/// Declaration list such as `@id int, @name nvarchar(4000) OUTPUT`.
///
/// Unnamed parameters are declared as `@p1`, `@p2`, … by position.
pub fn param_declarations(params: &[RpcParam<SqlValue>]) -> Result<String, TypeError> {
    let mut declarations = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let name = match param.name.as_str() {
            "" => format!("@p{}", index + 1),
            n if n.starts_with('@') => n.to_owned(),
            n => format!("@{n}"),
        };
        let mut declaration = format!("{name} {}", sql_declaration(&param.value)?);
        if param.direction == tds_wire::Direction::Out {
            declaration.push_str(" OUTPUT");
        }
        declarations.push(declaration);
    }
    Ok(declarations.join(", "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::ProcedureId;

    #[test]
    fn test_declarations() {
        let params = vec![
            RpcParam::new("@id", SqlValue::Int(1)),
            RpcParam::new("name", SqlValue::from("x")),
            RpcParam::new("", SqlValue::BigInt(2)),
            RpcParam::output("@out", SqlValue::Null),
        ];
        assert_eq!(
            param_declarations(&params).unwrap(),
            "@id int, @name nvarchar(4000), @p3 bigint, @out int OUTPUT"
        );
    }

    #[test]
    fn test_execute_sql_layout() {
        let request = execute_sql("SELECT @a", vec![RpcParam::new("@a", SqlValue::Int(1))]).unwrap();
        assert_eq!(request.procedure(), &ProcedureId::Id(10));
        let params = request.parameters();
        assert_eq!(params[0].value, SqlValue::from("SELECT @a"));
        assert_eq!(params[1].value, SqlValue::from("@a int"));
        assert_eq!(params[2].name, "@a");
    }

    #[test]
    fn test_execute_sql_without_params() {
        let request = execute_sql("SELECT 1", Vec::new()).unwrap();
        assert_eq!(request.parameters().len(), 1);
    }

    #[test]
    fn test_xml_parameter_rejected() {
        let err = execute_sql("SELECT @x", vec![RpcParam::new("@x", SqlValue::Xml("<a/>".into()))])
            .unwrap_err();
        assert!(matches!(err, TypeError::UnsupportedConversion { .. }));
    }

    #[test]
    fn test_prepare_and_unprepare() {
        let request = prepare("SELECT @a", &[RpcParam::new("@a", SqlValue::Int(1))]).unwrap();
        assert_eq!(request.procedure(), &ProcedureId::Id(ProcId::Prepare as u16));
        assert_eq!(request.parameters()[0].direction, tds_wire::Direction::Out);
        assert_eq!(request.parameters()[1].value, SqlValue::from("@a int"));

        let request = unprepare(7);
        assert_eq!(request.parameters()[0].value, SqlValue::Int(7));
    }
}
