// End-to-end coverage of the SQL-to-bytecode compiler against the in-memory
// reference cursor, exercising the real `translate::compile` + `Vm::run`
// path rather than hand-built programs.

use std::collections::HashMap;
use std::rc::Rc;

use vdbe_core::config::VdbeLimits;
use vdbe_core::cursor::{InMemoryStorage, InMemoryTable, Storage};
use vdbe_core::record;
use vdbe_core::translate::{
    self, Assignment, BinaryOp, Catalog, ColumnDef, CreateTableStmt, DeleteStmt, Expr, InsertStmt,
    SelectStmt, Statement, TableDef, UpdateStmt,
};
use vdbe_core::value::Value;
use vdbe_core::vm::{RunOutcome, Vm};

struct TestCatalog {
    tables: HashMap<String, TableDef>,
}

impl TestCatalog {
    fn new() -> Self {
        Self { tables: HashMap::new() }
    }

    fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.name.to_ascii_lowercase(), table);
        self
    }
}

impl Catalog for TestCatalog {
    fn get_table(&self, name: &str) -> Option<TableDef> {
        self.tables.get(&name.to_ascii_lowercase()).cloned()
    }
}

fn people_table(root_page: i32) -> TableDef {
    TableDef {
        name: "people".into(),
        columns: vec![
            ColumnDef { name: "id".into(), primary_key: true },
            ColumnDef { name: "name".into(), primary_key: false },
            ColumnDef { name: "age".into(), primary_key: false },
        ],
        root_page,
    }
}

fn seed_people(table: &InMemoryTable, rows: &[(u64, &str, i64)]) {
    for (id, name, age) in rows {
        let encoded = record::encode(&[
            Value::Int64(*id as i64),
            Value::Text((*name).to_string()),
            Value::Int64(*age),
        ]);
        table.seed(*id, encoded);
    }
}

fn run_program(
    compiled: translate::CompiledProgram,
    storage: Rc<dyn Storage>,
) -> (RunOutcome, Vec<Vec<Value>>) {
    let mut vm = Vm::new(Rc::new(compiled.program), storage, VdbeLimits::default());
    vm.set_num_registers(compiled.num_registers);
    let outcome = vm.run().expect("vm run should not error");
    (outcome, vm.results().to_vec())
}

#[test]
fn table_scan_returns_rows_in_rowid_order() {
    let table = InMemoryTable::new();
    seed_people(&table, &[(2, "Bea", 40), (1, "Ada", 30), (3, "Cy", 50)]);
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let stmt = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec![],
        predicate: None,
    });
    let compiled = translate::compile(&stmt, &catalog).unwrap();
    let (outcome, rows) = run_program(compiled, storage);

    assert_eq!(outcome, RunOutcome::Halted);
    let ids: Vec<i64> = rows
        .iter()
        .map(|r| match &r[0] {
            Value::Int64(i) => *i,
            other => panic!("unexpected id {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn where_predicate_filters_rows() {
    let table = InMemoryTable::new();
    seed_people(&table, &[(1, "Ada", 30), (2, "Bea", 40), (3, "Cy", 50)]);
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let stmt = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec!["name".into()],
        predicate: Some(Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expr::ColumnRef("age".into())),
            right: Box::new(Expr::Literal(Value::Int64(35))),
        }),
    });
    let compiled = translate::compile(&stmt, &catalog).unwrap();
    let (outcome, rows) = run_program(compiled, storage);

    assert_eq!(outcome, RunOutcome::Halted);
    let names: Vec<String> = rows
        .iter()
        .map(|r| match &r[0] {
            Value::Text(s) => s.clone(),
            other => panic!("unexpected name {other:?}"),
        })
        .collect();
    assert_eq!(names, vec!["Bea".to_string(), "Cy".to_string()]);
}

#[test]
fn insert_then_scan_reads_back_the_new_row() {
    let table = InMemoryTable::new();
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let insert = Statement::Insert(InsertStmt {
        table: "people".into(),
        columns: vec!["id".into(), "name".into(), "age".into()],
        values: vec![vec![
            Expr::Literal(Value::Int64(1)),
            Expr::Literal(Value::Text("Ada".into())),
            Expr::Literal(Value::Int64(30)),
        ]],
        select: None,
    });
    let compiled = translate::compile(&insert, &catalog).unwrap();
    let (outcome, _) = run_program(compiled, storage.clone());
    assert_eq!(outcome, RunOutcome::Halted);

    let select = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec![],
        predicate: None,
    });
    let compiled = translate::compile(&select, &catalog).unwrap();
    let (outcome, rows) = run_program(compiled, storage);
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Value::Text("Ada".into()));
}

#[test]
fn update_rewrites_matching_rows_in_place() {
    let table = InMemoryTable::new();
    seed_people(&table, &[(1, "Ada", 30), (2, "Bea", 40)]);
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let update = Statement::Update(UpdateStmt {
        table: "people".into(),
        assignments: vec![Assignment {
            column: "age".into(),
            value: Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::ColumnRef("age".into())),
                right: Box::new(Expr::Literal(Value::Int64(1))),
            },
        }],
        predicate: Some(Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(Expr::ColumnRef("id".into())),
            right: Box::new(Expr::Literal(Value::Int64(1))),
        }),
    });
    let compiled = translate::compile(&update, &catalog).unwrap();
    let (outcome, _) = run_program(compiled, storage.clone());
    assert_eq!(outcome, RunOutcome::Halted);

    let select = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec!["id".into(), "age".into()],
        predicate: None,
    });
    let compiled = translate::compile(&select, &catalog).unwrap();
    let (_, rows) = run_program(compiled, storage);
    let ages: HashMap<i64, i64> = rows
        .iter()
        .map(|r| {
            let id = match &r[0] {
                Value::Int64(i) => *i,
                other => panic!("{other:?}"),
            };
            let age = match &r[1] {
                Value::Int64(i) => *i,
                other => panic!("{other:?}"),
            };
            (id, age)
        })
        .collect();
    assert_eq!(ages[&1], 31);
    assert_eq!(ages[&2], 40);
}

#[test]
fn delete_without_predicate_empties_the_table() {
    let table = InMemoryTable::new();
    seed_people(&table, &[(1, "Ada", 30), (2, "Bea", 40), (3, "Cy", 50)]);
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let delete = Statement::Delete(DeleteStmt { table: "people".into(), predicate: None });
    let compiled = translate::compile(&delete, &catalog).unwrap();
    let (outcome, _) = run_program(compiled, storage.clone());
    assert_eq!(outcome, RunOutcome::Halted);

    let select = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec![],
        predicate: None,
    });
    let compiled = translate::compile(&select, &catalog).unwrap();
    let (_, rows) = run_program(compiled, storage);
    assert!(rows.is_empty());
}

#[test]
fn delete_with_predicate_removes_only_matching_rows() {
    let table = InMemoryTable::new();
    seed_people(&table, &[(1, "Ada", 30), (2, "Bea", 40), (3, "Cy", 50)]);
    let mut storage = InMemoryStorage::new();
    let root_page = storage.add_table(table);
    let storage: Rc<dyn Storage> = Rc::new(storage);

    let catalog = TestCatalog::new().with_table(people_table(root_page));
    let delete = Statement::Delete(DeleteStmt {
        table: "people".into(),
        predicate: Some(Expr::Binary {
            op: BinaryOp::Ge,
            left: Box::new(Expr::ColumnRef("age".into())),
            right: Box::new(Expr::Literal(Value::Int64(40))),
        }),
    });
    let compiled = translate::compile(&delete, &catalog).unwrap();
    run_program(compiled, storage.clone());

    let select = Statement::Select(SelectStmt {
        table: "people".into(),
        columns: vec!["id".into()],
        predicate: None,
    });
    let compiled = translate::compile(&select, &catalog).unwrap();
    let (_, rows) = run_program(compiled, storage);
    let ids: Vec<i64> = rows
        .iter()
        .map(|r| match &r[0] {
            Value::Int64(i) => *i,
            other => panic!("{other:?}"),
        })
        .collect();
    assert_eq!(ids, vec![1]);
}

#[test]
fn create_table_compiles_to_a_trivial_program() {
    let catalog = TestCatalog::new();
    let stmt = Statement::CreateTable(CreateTableStmt { table: people_table(0) });
    let compiled = translate::compile(&stmt, &catalog).unwrap();
    let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::new());
    let (outcome, rows) = run_program(compiled, storage);
    assert_eq!(outcome, RunOutcome::Halted);
    assert!(rows.is_empty());
}

#[test]
fn unknown_table_is_a_compile_error() {
    let catalog = TestCatalog::new();
    let stmt = Statement::Select(SelectStmt {
        table: "ghosts".into(),
        columns: vec![],
        predicate: None,
    });
    assert!(translate::compile(&stmt, &catalog).is_err());
}
