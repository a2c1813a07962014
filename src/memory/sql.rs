/// Statement conversion for the in-memory backend
///
/// Queries are parsed with `sqlparser` (MySQL dialect) and lowered into the
/// small statement set the store executes: CREATE TABLE, ALTER TABLE .. ADD
/// COLUMN, INSERT, UPDATE, DELETE and single-table SELECT with equality
/// filters. `?` placeholders are numbered in the order they appear.
use crate::core::Value;
use crate::error::{BackendError, BackendResult};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

/// An operand: a literal or a positional parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Param(usize),
}

impl Expr {
    pub fn eval(&self, params: &[Value]) -> BackendResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(index) => params.get(*index).cloned().ok_or_else(|| {
                BackendError::query(format!("missing value for parameter {}", index + 1))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// `column = operand`, joined with AND
pub type Filter = Vec<(String, Expr)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Expr>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
    Select {
        columns: Option<Vec<String>>,
        table: String,
        filter: Filter,
        limit: Option<usize>,
        offset: usize,
    },
}

pub fn parse(query: &str) -> BackendResult<Statement> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, query)
        .map_err(|e| BackendError::query(format!("syntax error: {}", e)))?;

    if statements.len() != 1 {
        return Err(BackendError::query(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }

    let mut converter = Converter { params: 0 };
    match statements.pop() {
        Some(statement) => converter.statement(statement),
        None => Err(BackendError::query("empty query")),
    }
}

/// Lowers `sqlparser` statements, numbering placeholders as it goes
struct Converter {
    params: usize,
}

impl Converter {
    fn statement(&mut self, statement: sql_ast::Statement) -> BackendResult<Statement> {
        match statement {
            sql_ast::Statement::CreateTable(create) => Ok(Statement::CreateTable {
                table: table_name(&create.name)?,
                columns: create
                    .columns
                    .into_iter()
                    .map(column_def)
                    .collect::<BackendResult<_>>()?,
            }),
            sql_ast::Statement::AlterTable {
                name, operations, ..
            } => {
                let table = table_name(&name)?;
                let mut operations = operations.into_iter();
                match (operations.next(), operations.next()) {
                    (Some(sql_ast::AlterTableOperation::AddColumn { column_def: def, .. }), None) => {
                        Ok(Statement::AddColumn {
                            table,
                            column: column_def(def)?,
                        })
                    }
                    _ => Err(unsupported("only ALTER TABLE .. ADD COLUMN is supported")),
                }
            }
            sql_ast::Statement::Insert(insert) => self.insert(insert),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table = relation_name(&table.relation)?;
                let assignments = assignments
                    .into_iter()
                    .map(|assignment| {
                        let column = match assignment.target {
                            sql_ast::AssignmentTarget::ColumnName(name) => table_name(&name)?,
                            _ => return Err(unsupported("only plain column assignments are supported")),
                        };
                        Ok((column, self.operand(assignment.value)?))
                    })
                    .collect::<BackendResult<_>>()?;
                Ok(Statement::Update {
                    table,
                    assignments,
                    filter: self.filter(selection)?,
                })
            }
            sql_ast::Statement::Delete(delete) => {
                let tables = match delete.from {
                    sql_ast::FromTable::WithFromKeyword(tables)
                    | sql_ast::FromTable::WithoutKeyword(tables) => tables,
                };
                let table = match tables.first() {
                    Some(from) => relation_name(&from.relation)?,
                    None => return Err(BackendError::query("DELETE requires a table")),
                };
                Ok(Statement::Delete {
                    table,
                    filter: self.filter(delete.selection)?,
                })
            }
            sql_ast::Statement::Query(query) => self.select(*query),
            other => Err(unsupported(format!("statement not supported: {}", other))),
        }
    }

    fn insert(&mut self, insert: sql_ast::Insert) -> BackendResult<Statement> {
        let table = match &insert.table {
            sql_ast::TableObject::TableName(name) => table_name(name)?,
            _ => return Err(unsupported("INSERT into a table function")),
        };
        let columns: Vec<String> = insert
            .columns
            .iter()
            .map(|ident| ident.value.to_lowercase())
            .collect();

        let source = insert
            .source
            .ok_or_else(|| BackendError::query("INSERT requires a VALUES clause"))?;
        let mut rows = match *source.body {
            sql_ast::SetExpr::Values(values) => values.rows,
            _ => return Err(unsupported("only INSERT .. VALUES is supported")),
        };
        if rows.len() != 1 {
            return Err(unsupported("only single-row INSERT is supported"));
        }
        let row = rows.remove(0);
        if row.len() != columns.len() {
            return Err(BackendError::query(format!(
                "column count {} does not match value count {}",
                columns.len(),
                row.len()
            )));
        }

        let values = row
            .into_iter()
            .map(|expr| self.operand(expr))
            .collect::<BackendResult<_>>()?;
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn select(&mut self, query: sql_ast::Query) -> BackendResult<Statement> {
        let select = match *query.body {
            sql_ast::SetExpr::Select(select) => select,
            _ => return Err(unsupported("only plain SELECT is supported")),
        };
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(unsupported("SELECT must read exactly one table"));
        }

        let mut columns = Vec::new();
        let mut wildcard = false;
        for item in select.projection {
            match item {
                sql_ast::SelectItem::Wildcard(_) => wildcard = true,
                sql_ast::SelectItem::UnnamedExpr(sql_ast::Expr::Identifier(ident)) => {
                    columns.push(ident.value.to_lowercase())
                }
                _ => return Err(unsupported("only column names or * can be selected")),
            }
        }
        let columns = if wildcard { None } else { Some(columns) };

        let table = relation_name(&select.from[0].relation)?;
        let filter = self.filter(select.selection)?;

        let (limit, offset) = match query.limit_clause {
            None => (None, 0),
            Some(sql_ast::LimitClause::LimitOffset { limit, offset, .. }) => (
                limit.map(count).transpose()?,
                offset.map(|o| count(o.value)).transpose()?.unwrap_or(0),
            ),
            Some(sql_ast::LimitClause::OffsetCommaLimit { offset, limit, .. }) => {
                (Some(count(limit)?), count(offset)?)
            }
        };

        Ok(Statement::Select {
            columns,
            table,
            filter,
            limit,
            offset,
        })
    }

    fn filter(&mut self, selection: Option<sql_ast::Expr>) -> BackendResult<Filter> {
        let mut filter = Vec::new();
        if let Some(expr) = selection {
            self.conjunction(expr, &mut filter)?;
        }
        Ok(filter)
    }

    fn conjunction(&mut self, expr: sql_ast::Expr, filter: &mut Filter) -> BackendResult<()> {
        match expr {
            sql_ast::Expr::BinaryOp {
                left,
                op: sql_ast::BinaryOperator::And,
                right,
            } => {
                self.conjunction(*left, filter)?;
                self.conjunction(*right, filter)
            }
            sql_ast::Expr::BinaryOp {
                left,
                op: sql_ast::BinaryOperator::Eq,
                right,
            } => match *left {
                sql_ast::Expr::Identifier(ident) => {
                    filter.push((ident.value.to_lowercase(), self.operand(*right)?));
                    Ok(())
                }
                _ => Err(unsupported("filters compare a column to a value")),
            },
            sql_ast::Expr::Nested(inner) => self.conjunction(*inner, filter),
            other => Err(unsupported(format!("unsupported filter: {}", other))),
        }
    }

    fn operand(&mut self, expr: sql_ast::Expr) -> BackendResult<Expr> {
        match expr {
            sql_ast::Expr::Value(value) => match value.value {
                sql_ast::Value::Placeholder(_) => {
                    let index = self.params;
                    self.params += 1;
                    Ok(Expr::Param(index))
                }
                other => literal(&other, false).map(Expr::Literal),
            },
            sql_ast::Expr::UnaryOp {
                op: sql_ast::UnaryOperator::Minus,
                expr,
            } => match *expr {
                sql_ast::Expr::Value(value) => literal(&value.value, true).map(Expr::Literal),
                _ => Err(unsupported("only literals can be negated")),
            },
            sql_ast::Expr::Nested(inner) => self.operand(*inner),
            other => Err(unsupported(format!("unsupported operand: {}", other))),
        }
    }
}

fn column_def(def: sql_ast::ColumnDef) -> BackendResult<ColumnDef> {
    let nullable = !def
        .options
        .iter()
        .any(|opt| matches!(opt.option, sql_ast::ColumnOption::NotNull));
    Ok(ColumnDef {
        name: def.name.value.to_lowercase(),
        data_type: def.data_type.to_string().to_uppercase(),
        nullable,
    })
}

/// Last part of a possibly qualified name, lowercased
fn table_name(name: &sql_ast::ObjectName) -> BackendResult<String> {
    match name.0.last() {
        Some(sql_ast::ObjectNamePart::Identifier(ident)) => Ok(ident.value.to_lowercase()),
        _ => Err(BackendError::query(format!("invalid name '{}'", name))),
    }
}

fn relation_name(relation: &sql_ast::TableFactor) -> BackendResult<String> {
    match relation {
        sql_ast::TableFactor::Table { name, .. } => table_name(name),
        _ => Err(unsupported("only plain table references are supported")),
    }
}

fn literal(value: &sql_ast::Value, negative: bool) -> BackendResult<Value> {
    match value {
        sql_ast::Value::Number(text, _) => number(text, negative),
        _ if negative => Err(BackendError::query(format!("cannot negate {}", value))),
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            Ok(Value::Text(s.clone()))
        }
        sql_ast::Value::Boolean(b) => Ok(Value::Bool(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        other => Err(unsupported(format!("unsupported value: {}", other))),
    }
}

fn number(text: &str, negative: bool) -> BackendResult<Value> {
    let text = if negative {
        format!("-{}", text)
    } else {
        text.to_string()
    };
    if let Ok(i) = text.parse::<i64>() {
        Ok(Value::Int(i))
    } else {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| BackendError::query(format!("invalid number '{}'", text)))
    }
}

/// LIMIT / OFFSET operand
fn count(expr: sql_ast::Expr) -> BackendResult<usize> {
    match expr {
        sql_ast::Expr::Value(value) => match &value.value {
            sql_ast::Value::Number(text, _) => text
                .parse()
                .map_err(|_| BackendError::query(format!("invalid row count '{}'", text))),
            other => Err(unsupported(format!("row count must be a number, got {}", other))),
        },
        other => Err(unsupported(format!("row count must be a number, got {}", other))),
    }
}

fn unsupported(message: impl Into<String>) -> BackendError {
    BackendError::query(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_with_filter_and_limit() {
        let stmt = parse("SELECT id, col1 FROM Items WHERE id = ? AND name = 'a''b' LIMIT 5 OFFSET 2")
            .unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                columns: Some(vec!["id".to_string(), "col1".to_string()]),
                table: "items".to_string(),
                filter: vec![
                    ("id".to_string(), Expr::Param(0)),
                    ("name".to_string(), Expr::Literal(Value::from("a'b"))),
                ],
                limit: Some(5),
                offset: 2,
            }
        );
    }

    #[test]
    fn test_parse_select_star_with_mysql_limit() {
        let stmt = parse("SELECT * FROM `items` LIMIT 2, 3").unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                columns: None,
                table: "items".to_string(),
                filter: vec![],
                limit: Some(3),
                offset: 2,
            }
        );
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = parse("CREATE TABLE t (id INT NOT NULL, name VARCHAR(32) DEFAULT 'x')").unwrap();
        match stmt {
            Statement::CreateTable { table, columns } => {
                assert_eq!(table, "t");
                assert_eq!(columns[0].data_type, "INT");
                assert!(!columns[0].nullable);
                assert_eq!(columns[1].data_type, "VARCHAR(32)");
                assert!(columns[1].nullable);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_alter_table() {
        let stmt = parse("ALTER TABLE t ADD COLUMN extra INT").unwrap();
        assert!(matches!(stmt, Statement::AddColumn { ref column, .. } if column.name == "extra"));
    }

    #[test]
    fn test_parameters_numbered_in_order() {
        let stmt = parse("UPDATE t SET col1 = -5, name = ? WHERE id = ?").unwrap();
        assert_eq!(
            stmt,
            Statement::Update {
                table: "t".to_string(),
                assignments: vec![
                    ("col1".to_string(), Expr::Literal(Value::Int(-5))),
                    ("name".to_string(), Expr::Param(0)),
                ],
                filter: vec![("id".to_string(), Expr::Param(1))],
            }
        );

        let stmt = parse("INSERT INTO t (id, col1) VALUES (?, ?);").unwrap();
        assert!(matches!(stmt, Statement::Insert { ref values, .. } if values == &[Expr::Param(0), Expr::Param(1)]));
    }

    #[test]
    fn test_malformed_statements() {
        let err = parse("SELEC * FROM t").unwrap_err();
        assert!(err.to_string().contains("syntax error"));
        assert!(parse("SELECT * FROM").is_err());
        assert!(parse("INSERT INTO t (a, b) VALUES (1)").is_err());
        assert!(parse("SELECT * FROM t WHERE name = 'open").is_err());
        assert!(parse("SELECT * FROM t WHERE a > 1").is_err());
        assert!(parse("SELECT 1; SELECT 2").is_err());
    }
}
