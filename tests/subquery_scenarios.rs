//! End-to-end subquery evaluation through prepared statements

use pretty_assertions::assert_eq;
use subquery_engine::config::SubqueryConfig;
use subquery_engine::schema::{Catalog, ColumnDef, TableDef};
use subquery_engine::sql::subquery::EngineStats;
use subquery_engine::sql::{
    CompareOp, PreparedStatement, Statement, StatementBuilder, Strategy, SubqueryId,
};
use subquery_engine::sql::subquery::Quantifier;
use subquery_engine::types::{DataType, Value};

fn int(v: i64) -> Value {
    Value::Int(v)
}

fn create(catalog: &mut Catalog, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
    let defs = columns
        .iter()
        .map(|c| ColumnDef::new(*c, DataType::Int8))
        .collect();
    catalog.create_table(TableDef::new(name, defs)).unwrap();
    catalog.insert_all(name, rows).unwrap();
}

fn run(catalog: &Catalog, stmt: Statement, config: SubqueryConfig) -> (Vec<Vec<Value>>, Vec<Strategy>) {
    let mut prepared = PreparedStatement::prepare(stmt, config).unwrap();
    let rows = prepared.execute(catalog).unwrap();
    let strategies = prepared.strategies().into_iter().map(|(_, s)| s).collect();
    (rows, strategies)
}

fn stats_of(prepared: &PreparedStatement, sid: usize) -> EngineStats {
    prepared
        .last_engine_stats()
        .iter()
        .find(|(id, _)| *id == SubqueryId::new(sid))
        .map(|(_, s)| *s)
        .unwrap()
}

mod scenario_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// `SELECT t1.a FROM t1 WHERE t1.a IN (SELECT t2.b FROM t2)`
    fn in_where(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let col = b.column(t2, "b").unwrap();
        b.project(sub, [col]);
        let pred = b.in_subquery(root, &[a], spec).unwrap();
        b.filter(root, pred);
        b.project(root, [a]);
        b.build().unwrap()
    }

    #[test]
    fn test_in_flattens_to_semijoin_without_duplicates() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(1)], vec![int(2)], vec![int(3)]]);
        create(&mut catalog, "t2", &["b"], vec![vec![int(2)], vec![int(3)], vec![int(3)]]);

        let (rows, strategies) = run(&catalog, in_where(&catalog), SubqueryConfig::default());

        assert_eq!(strategies, vec![Strategy::Semijoin]);
        assert_eq!(rows, vec![vec![int(2)], vec![int(3)]]);
    }

    #[test]
    fn test_semijoin_matches_reexecution() {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            "t1",
            &["a"],
            vec![vec![int(1)], vec![int(2)], vec![Value::Null], vec![int(3)]],
        );
        create(
            &mut catalog,
            "t2",
            &["b"],
            vec![vec![int(3)], vec![Value::Null], vec![int(2)], vec![int(2)]],
        );

        let (flattened, s1) = run(&catalog, in_where(&catalog), SubqueryConfig::default());
        let (reexecuted, s2) = run(&catalog, in_where(&catalog), SubqueryConfig::reexecution_only());
        let (materialized, s3) = run(
            &catalog,
            in_where(&catalog),
            SubqueryConfig::default().with_semijoin(false),
        );

        assert_eq!(s1, vec![Strategy::Semijoin]);
        assert_eq!(s2, vec![Strategy::ExistsOrMaterialize]);
        assert_eq!(s3, vec![Strategy::ExistsOrMaterialize]);
        assert_eq!(flattened, vec![vec![int(2)], vec![int(3)]]);
        assert_eq!(reexecuted, flattened);
        assert_eq!(materialized, flattened);
    }

    /// `SELECT (SELECT MAX(t2.b) FROM t2 WHERE t2.a = t1.a) FROM t1`
    fn correlated_scalar(catalog: &Catalog, aggregate: bool) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a1 = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let b2 = b.column(t2, "b").unwrap();
        let corr = b.eq(a2, a1);
        b.filter(sub, corr);
        let item = if aggregate {
            b.aggregate(subquery_engine::sql::AggFunc::Max, b2)
        } else {
            b2
        };
        b.project(sub, [item]);
        let scalar = b.scalar(root, spec).unwrap();
        b.project(root, [scalar]);
        b.build().unwrap()
    }

    fn scalar_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(1)]]);
        create(
            &mut catalog,
            "t2",
            &["a", "b"],
            vec![vec![int(1), int(5)], vec![int(1), int(9)]],
        );
        catalog
    }

    #[test]
    fn test_correlated_max_becomes_derived_table() {
        let catalog = scalar_catalog();
        let (rows, strategies) = run(
            &catalog,
            correlated_scalar(&catalog, true),
            SubqueryConfig::default(),
        );
        assert_eq!(strategies, vec![Strategy::DerivedTable]);
        assert_eq!(rows, vec![vec![int(9)]]);

        let (rows, strategies) = run(
            &catalog,
            correlated_scalar(&catalog, true),
            SubqueryConfig::reexecution_only(),
        );
        assert_eq!(strategies, vec![Strategy::Reexecute]);
        assert_eq!(rows, vec![vec![int(9)]]);
    }

    #[test]
    fn test_correlated_scalar_with_two_rows_fails() {
        let catalog = scalar_catalog();
        for config in [SubqueryConfig::default(), SubqueryConfig::reexecution_only()] {
            let mut prepared =
                PreparedStatement::prepare(correlated_scalar(&catalog, false), config).unwrap();
            let err = prepared.execute(&catalog).unwrap_err();
            assert!(
                err.chain().any(|e| e.to_string() == "subquery returns more than one row"),
                "unexpected error: {:#}",
                err
            );
        }
    }

    #[test]
    fn test_correlated_scalar_without_match_is_null() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(1)], vec![int(2)]]);
        create(
            &mut catalog,
            "t2",
            &["a", "b"],
            vec![vec![int(1), int(5)], vec![int(3), int(9)]],
        );
        let (rows, strategies) = run(
            &catalog,
            correlated_scalar(&catalog, false),
            SubqueryConfig::default(),
        );
        assert_eq!(strategies, vec![Strategy::DerivedTable]);
        assert_eq!(rows, vec![vec![int(5)], vec![Value::Null]]);
    }

    #[test]
    fn test_not_exists_becomes_antijoin() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(1)], vec![int(2)]]);
        create(&mut catalog, "t2", &["a"], vec![vec![int(1)]]);

        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a1 = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let corr = b.eq(a2, a1);
        b.filter(sub, corr);
        b.project(sub, [a2]);
        let exists = b.exists(root, spec).unwrap();
        let not_exists = b.not(exists);
        b.filter(root, not_exists);
        b.project(root, [a1]);
        let stmt = b.build().unwrap();

        let (rows, strategies) = run(&catalog, stmt, SubqueryConfig::default());
        assert_eq!(strategies, vec![Strategy::Antijoin]);
        assert_eq!(rows, vec![vec![int(2)]]);
    }

    /// `SELECT t1.a, t1.a IN (SELECT t2.b FROM t2) FROM t1`
    fn in_select(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let col = b.column(t2, "b").unwrap();
        b.project(sub, [col]);
        let pred = b.in_subquery(root, &[a], spec).unwrap();
        b.project(root, [a, pred]);
        b.build().unwrap()
    }

    #[test]
    fn test_materialized_in_runs_subquery_once() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(2)], vec![int(7)]]);
        create(&mut catalog, "t2", &["b"], vec![vec![int(2)], vec![int(3)]]);

        let mut prepared = PreparedStatement::prepare(in_select(&catalog), SubqueryConfig::default()).unwrap();
        for _ in 0..2 {
            let rows = prepared.execute(&catalog).unwrap();
            assert_eq!(
                rows,
                vec![
                    vec![int(2), Value::Bool(true)],
                    vec![int(7), Value::Bool(false)],
                ]
            );
            let stats = stats_of(&prepared, 0);
            assert_eq!(stats.materializations, 1);
            assert_eq!(stats.lookups, 2);
            assert_eq!(stats.rows_read, 2);
        }
        assert_eq!(
            prepared.strategies().into_iter().map(|(_, s)| s).collect::<Vec<_>>(),
            vec![Strategy::ExistsOrMaterialize]
        );
    }

    #[test]
    fn test_materialization_switch_is_read_per_execution() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(2)], vec![int(7)]]);
        create(&mut catalog, "t2", &["b"], vec![vec![int(2)], vec![int(3)]]);

        let mut prepared = PreparedStatement::prepare(in_select(&catalog), SubqueryConfig::default()).unwrap();
        let materialized = prepared.execute(&catalog).unwrap();
        assert_eq!(stats_of(&prepared, 0).materializations, 1);

        prepared.set_config(SubqueryConfig::default().with_materialization(false));
        let reexecuted = prepared.execute(&catalog).unwrap();
        let stats = stats_of(&prepared, 0);
        assert_eq!(stats.materializations, 0);
        assert_eq!(stats.executions, 2);
        assert_eq!(reexecuted, materialized);
    }

    #[test]
    fn test_unique_lookup_answers_in_by_index() {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            "t1",
            &["a"],
            vec![vec![int(1)], vec![int(4)], vec![Value::Null]],
        );
        catalog
            .create_table(
                TableDef::new(
                    "t2",
                    vec![
                        ColumnDef::new("id", DataType::Int8).not_null(),
                        ColumnDef::new("v", DataType::Int8),
                    ],
                )
                .with_unique_index("t2_pk", &["id"]),
            )
            .unwrap();
        catalog
            .insert_all("t2", vec![vec![int(1), int(10)], vec![int(2), int(20)]])
            .unwrap();

        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let id = b.column(t2, "id").unwrap();
        b.project(sub, [id]);
        let pred = b.in_subquery(root, &[a], spec).unwrap();
        b.project(root, [a, pred]);

        let mut prepared = PreparedStatement::prepare(b.build().unwrap(), SubqueryConfig::default()).unwrap();
        let rows = prepared.execute(&catalog).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![int(1), Value::Bool(true)],
                vec![int(4), Value::Bool(false)],
                vec![Value::Null, Value::Null],
            ]
        );
        let stats = stats_of(&prepared, 0);
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.materializations, 0);
    }
}

mod three_valued_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// `SELECT t1.a, t1.a IN (S), t1.a NOT IN (S) FROM t1` with `S = SELECT t2.b FROM t2`
    fn in_and_not_in(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let mut preds = Vec::new();
        for negate in [false, true] {
            let (spec, sub) = b.new_subquery();
            let t2 = b.table(sub, "t2").unwrap();
            let col = b.column(t2, "b").unwrap();
            b.project(sub, [col]);
            let pred = b.in_subquery(root, &[a], spec).unwrap();
            preds.push(if negate { b.not(pred) } else { pred });
        }
        b.project(root, [a, preds[0], preds[1]]);
        b.build().unwrap()
    }

    fn null_catalog(inner: Vec<Vec<Value>>) -> Catalog {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            "t1",
            &["a"],
            vec![vec![int(1)], vec![int(2)], vec![Value::Null]],
        );
        create(&mut catalog, "t2", &["b"], inner);
        catalog
    }

    #[test]
    fn test_in_with_null_in_subquery_is_unknown() {
        let catalog = null_catalog(vec![vec![int(2)], vec![Value::Null]]);
        let expected = vec![
            vec![int(1), Value::Null, Value::Null],
            vec![int(2), Value::Bool(true), Value::Bool(false)],
            vec![Value::Null, Value::Null, Value::Null],
        ];
        for config in [
            SubqueryConfig::default(),
            SubqueryConfig::default().with_materialization(false),
            SubqueryConfig::reexecution_only(),
        ] {
            let (rows, _) = run(&catalog, in_and_not_in(&catalog), config);
            assert_eq!(rows, expected);
        }
    }

    #[test]
    fn test_in_over_empty_subquery_is_false() {
        let catalog = null_catalog(Vec::new());
        let expected = vec![
            vec![int(1), Value::Bool(false), Value::Bool(true)],
            vec![int(2), Value::Bool(false), Value::Bool(true)],
            vec![Value::Null, Value::Bool(false), Value::Bool(true)],
        ];
        for config in [SubqueryConfig::default(), SubqueryConfig::reexecution_only()] {
            let (rows, _) = run(&catalog, in_and_not_in(&catalog), config);
            assert_eq!(rows, expected);
        }
    }

    /// `SELECT t1.a FROM t1 WHERE t1.a NOT IN (SELECT t2.b FROM t2)`
    fn not_in_where(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let col = b.column(t2, "b").unwrap();
        b.project(sub, [col]);
        let pred = b.in_subquery(root, &[a], spec).unwrap();
        let pred = b.not(pred);
        b.filter(root, pred);
        b.project(root, [a]);
        b.build().unwrap()
    }

    #[test]
    fn test_not_in_with_inner_null_returns_nothing() {
        let catalog = null_catalog(vec![vec![int(2)], vec![Value::Null]]);
        let (rows, strategies) = run(&catalog, not_in_where(&catalog), SubqueryConfig::default());
        assert_eq!(strategies, vec![Strategy::Antijoin]);
        assert!(rows.is_empty());

        let (rows, _) = run(&catalog, not_in_where(&catalog), SubqueryConfig::reexecution_only());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_not_in_drops_null_outer_value() {
        let catalog = null_catalog(vec![vec![int(2)]]);
        for config in [SubqueryConfig::default(), SubqueryConfig::reexecution_only()] {
            let (rows, _) = run(&catalog, not_in_where(&catalog), config);
            assert_eq!(rows, vec![vec![int(1)]]);
        }
    }

    /// `SELECT t1.a FROM t1 WHERE t1.a > ALL (SELECT t2.b FROM t2)`
    fn greater_than_all(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let col = b.column(t2, "b").unwrap();
        b.project(sub, [col]);
        let pred = b
            .quantified(root, &[a], CompareOp::Gt, Quantifier::All, spec)
            .unwrap();
        b.filter(root, pred);
        b.project(root, [a]);
        b.build().unwrap()
    }

    #[test]
    fn test_greater_than_all_uses_minmax() {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            "t1",
            &["a"],
            vec![vec![int(1)], vec![int(5)], vec![Value::Null]],
        );
        create(&mut catalog, "t2", &["b"], vec![vec![int(2)], vec![int(3)]]);

        let (rows, strategies) = run(&catalog, greater_than_all(&catalog), SubqueryConfig::default());
        assert_eq!(strategies, vec![Strategy::MinMax]);
        assert_eq!(rows, vec![vec![int(5)]]);

        let (rows, strategies) = run(
            &catalog,
            greater_than_all(&catalog),
            SubqueryConfig::reexecution_only(),
        );
        assert_eq!(strategies, vec![Strategy::InToExists]);
        assert_eq!(rows, vec![vec![int(5)]]);
    }

    #[test]
    fn test_all_over_empty_subquery_is_true() {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            "t1",
            &["a"],
            vec![vec![int(1)], vec![Value::Null]],
        );
        create(&mut catalog, "t2", &["b"], Vec::new());

        for config in [SubqueryConfig::default(), SubqueryConfig::reexecution_only()] {
            let (rows, _) = run(&catalog, greater_than_all(&catalog), config);
            assert_eq!(rows, vec![vec![int(1)], vec![Value::Null]]);
        }
    }

    #[test]
    fn test_all_with_null_in_subquery_is_unknown() {
        let mut catalog = Catalog::new();
        create(&mut catalog, "t1", &["a"], vec![vec![int(5)]]);
        create(&mut catalog, "t2", &["b"], vec![vec![int(2)], vec![Value::Null]]);

        for config in [SubqueryConfig::default(), SubqueryConfig::reexecution_only()] {
            let (rows, _) = run(&catalog, greater_than_all(&catalog), config);
            assert!(rows.is_empty());
        }
    }
}

mod flattening_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog(t1: &[i64], t2: &[i64], t3: &[i64]) -> Catalog {
        let mut catalog = Catalog::new();
        for (name, values) in [("t1", t1), ("t2", t2), ("t3", t3)] {
            create(
                &mut catalog,
                name,
                &["a"],
                values.iter().map(|&v| vec![int(v)]).collect(),
            );
        }
        catalog
    }

    fn both_ways(catalog: &Catalog, build: impl Fn(&Catalog) -> Statement) -> Vec<Vec<Value>> {
        let (flattened, strategies) = run(catalog, build(catalog), SubqueryConfig::default());
        assert!(strategies.iter().all(|&s| s == Strategy::Antijoin), "{:?}", strategies);
        let (reexecuted, _) = run(catalog, build(catalog), SubqueryConfig::reexecution_only());
        assert_eq!(flattened, reexecuted);
        flattened
    }

    /// `SELECT t1.a FROM t1 WHERE NOT EXISTS (SELECT t2.a FROM t2 WHERE t2.a = t1.a
    ///  AND NOT EXISTS (SELECT t3.a FROM t3 WHERE t3.a = t2.a))`, registering t3
    /// before t2
    fn nested_not_exists(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a1 = b.column(t1, "a").unwrap();
        let (outer_spec, outer_sub) = b.new_subquery();
        let (inner_spec, inner_sub) = b.new_subquery();
        let t3 = b.table(inner_sub, "t3").unwrap();
        let t2 = b.table(outer_sub, "t2").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let a3 = b.column(t3, "a").unwrap();
        let inner_corr = b.eq(a3, a2);
        b.filter(inner_sub, inner_corr);
        b.project(inner_sub, [a3]);
        let inner = b.exists(outer_sub, inner_spec).unwrap();
        let not_inner = b.not(inner);
        let outer_corr = b.eq(a2, a1);
        let cond = b.and([outer_corr, not_inner]);
        b.filter(outer_sub, cond);
        b.project(outer_sub, [a2]);
        let outer = b.exists(root, outer_spec).unwrap();
        let not_outer = b.not(outer);
        b.filter(root, not_outer);
        b.project(root, [a1]);
        b.build().unwrap()
    }

    #[test]
    fn test_nested_not_exists_drops_matched_row() {
        let catalog = catalog(&[1], &[1], &[]);
        assert!(both_ways(&catalog, nested_not_exists).is_empty());
    }

    #[test]
    fn test_nested_not_exists_keeps_unmatched_rows() {
        let catalog = catalog(&[1, 2, 3], &[1, 2], &[2]);
        assert_eq!(
            both_ways(&catalog, nested_not_exists),
            vec![vec![int(2)], vec![int(3)]]
        );
    }

    /// `SELECT t1.a FROM t1 WHERE NOT EXISTS (SELECT t2.a FROM t2 LEFT JOIN t3
    ///  ON t3.a = t2.a WHERE t2.a = t1.a AND t3.a IS NULL)`
    fn not_exists_over_left_join(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a1 = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t2").unwrap();
        let t3 = b.left_join(sub, "t3").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let a3 = b.column(t3, "a").unwrap();
        let join = b.eq(a3, a2);
        b.on(t3, join).unwrap();
        let corr = b.eq(a2, a1);
        let missing = b.is_null(a3, false);
        let cond = b.and([corr, missing]);
        b.filter(sub, cond);
        b.project(sub, [a2]);
        let pred = b.exists(root, spec).unwrap();
        let pred = b.not(pred);
        b.filter(root, pred);
        b.project(root, [a1]);
        b.build().unwrap()
    }

    #[test]
    fn test_not_exists_over_left_join() {
        let catalog = catalog(&[1, 2, 3], &[1, 2], &[2]);
        assert_eq!(
            both_ways(&catalog, not_exists_over_left_join),
            vec![vec![int(2)], vec![int(3)]]
        );
    }

    /// `SELECT t1.a FROM t1 WHERE NOT EXISTS (SELECT t2.a FROM t3, t2
    ///  WHERE t2.a = t1.a AND t3.a = t2.a)`
    fn not_exists_over_two_tables(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let t1 = b.table(root, "t1").unwrap();
        let a1 = b.column(t1, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t3 = b.table(sub, "t3").unwrap();
        let t2 = b.table(sub, "t2").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let a3 = b.column(t3, "a").unwrap();
        let corr = b.eq(a2, a1);
        let join = b.eq(a3, a2);
        let cond = b.and([corr, join]);
        b.filter(sub, cond);
        b.project(sub, [a2]);
        let pred = b.exists(root, spec).unwrap();
        let pred = b.not(pred);
        b.filter(root, pred);
        b.project(root, [a1]);
        b.build().unwrap()
    }

    #[test]
    fn test_not_exists_over_two_tables() {
        let catalog = catalog(&[1, 2, 3], &[1, 2], &[2]);
        assert_eq!(
            both_ways(&catalog, not_exists_over_two_tables),
            vec![vec![int(1)], vec![int(3)]]
        );
    }
}
