//! A compiled plan instantiated with operator state.

use indexmap::IndexMap;
use ripple_catalog::{Operator, Plan};
use ripple_core::{normalize_ident, Row};

use crate::error::RuntimeError;
use crate::operator::{self, IncrementalOperator};
use crate::zset::ZSet;

/// Executable form of a [`Plan`].
///
/// Every call to [`Circuit::step`] feeds one delta per changed table through
/// the operators in topological order. Only nodes downstream of a changed
/// table are evaluated. View contents are integrated after each step so
/// snapshots can be read without replaying history.
pub struct Circuit {
    plan: Plan,
    operators: Vec<Box<dyn IncrementalOperator>>,
    /// Current contents of every view.
    views: IndexMap<String, ZSet>,
    steps: u64,
}

impl Circuit {
    pub fn new(plan: Plan) -> Self {
        let operators = plan.nodes.iter().map(operator::build).collect();
        let views = plan
            .views
            .keys()
            .map(|name| (name.clone(), ZSet::new()))
            .collect();
        Self {
            plan,
            operators,
            views,
            steps: 0,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Apply table deltas and return the resulting delta of every table and
    /// view that changed.
    pub fn step<I>(&mut self, inputs: I) -> Result<IndexMap<String, ZSet>, RuntimeError>
    where
        I: IntoIterator<Item = (String, ZSet)>,
    {
        let mut deltas: Vec<ZSet> = vec![ZSet::new(); self.plan.nodes.len()];
        for (table, delta) in inputs {
            let name = normalize_ident(&table);
            let id = *self
                .plan
                .tables
                .get(&name)
                .ok_or(RuntimeError::UnknownTable(name))?;
            deltas[id].merge(&delta);
        }

        for node in &self.plan.nodes {
            if matches!(node.op, Operator::Scan { .. }) {
                let input = std::mem::take(&mut deltas[node.id]);
                deltas[node.id] = self.operators[node.id].step(&[&input])?;
                continue;
            }
            if node.inputs.iter().all(|&i| deltas[i].is_empty()) {
                continue;
            }
            let inputs: Vec<&ZSet> = node.inputs.iter().map(|&i| &deltas[i]).collect();
            let output = self.operators[node.id].step(&inputs)?;
            deltas[node.id] = output;
        }
        self.steps += 1;

        let mut changed = IndexMap::new();
        for (name, &id) in &self.plan.tables {
            if !deltas[id].is_empty() {
                changed.insert(name.clone(), deltas[id].clone());
            }
        }
        for (name, &id) in &self.plan.views {
            let delta = &deltas[id];
            if delta.is_empty() {
                continue;
            }
            if let Some(contents) = self.views.get_mut(name) {
                contents.merge(delta);
            }
            changed.insert(name.clone(), delta.clone());
        }
        Ok(changed)
    }

    /// Current contents of a view, in row order.
    pub fn view_snapshot(&self, view: &str) -> Result<Vec<(Row, i64)>, RuntimeError> {
        let name = normalize_ident(view);
        self.views
            .get(&name)
            .map(ZSet::to_vec)
            .ok_or(RuntimeError::UnknownView(name))
    }

    /// Rows held in operator state, summed over all operators.
    pub fn state_size(&self) -> usize {
        self.operators.iter().map(|op| op.state_size()).sum()
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::Value;

    const SQL: &str = "
        CREATE TABLE demographics (cc_num BIGINT NOT NULL, first VARCHAR, city VARCHAR);
        CREATE TABLE transactions (trans_num VARCHAR NOT NULL, cc_num BIGINT NOT NULL, amt DOUBLE);
        CREATE VIEW transactions_with_demographics AS
            SELECT t.trans_num, t.amt, d.first, d.city
            FROM transactions AS t JOIN demographics AS d ON t.cc_num = d.cc_num;
        CREATE VIEW spend_by_city AS
            SELECT city, COUNT(*) AS n, SUM(amt) AS total
            FROM transactions_with_demographics GROUP BY city;
    ";

    fn circuit() -> Circuit {
        Circuit::new(ripple_catalog::compile(SQL).unwrap().plan)
    }

    fn person(cc: i64, first: &str, city: &str) -> Row {
        Row::new(vec![Value::Integer(cc), Value::from(first), Value::from(city)])
    }

    fn txn(id: &str, cc: i64, amt: f64) -> Row {
        Row::new(vec![Value::from(id), Value::Integer(cc), Value::Float(amt)])
    }

    fn insert(rows: Vec<Row>) -> ZSet {
        rows.into_iter().map(|r| (r, 1)).collect()
    }

    #[test]
    fn deltas_flow_through_joins_and_aggregates() {
        let mut circuit = circuit();
        let changed = circuit
            .step([("DEMOGRAPHICS".to_string(), insert(vec![person(1, "ann", "Oslo")]))])
            .unwrap();
        assert_eq!(changed.keys().collect::<Vec<_>>(), vec!["demographics"]);

        let changed = circuit
            .step([(
                "transactions".to_string(),
                insert(vec![txn("t1", 1, 10.0), txn("t2", 1, 5.5), txn("t3", 2, 1.0)]),
            )])
            .unwrap();
        assert_eq!(changed["transactions_with_demographics"].len(), 2);
        assert_eq!(
            circuit.view_snapshot("spend_by_city").unwrap(),
            vec![(
                Row::new(vec![Value::from("Oslo"), Value::Integer(2), Value::Float(15.5)]),
                1
            )]
        );
        assert_eq!(circuit.steps(), 2);
    }

    #[test]
    fn retractions_update_snapshots() {
        let mut circuit = circuit();
        circuit
            .step([
                ("demographics".to_string(), insert(vec![person(1, "ann", "Oslo")])),
                ("transactions".to_string(), insert(vec![txn("t1", 1, 10.0)])),
            ])
            .unwrap();
        let retract: ZSet = [(person(1, "ann", "Oslo"), -1)].into_iter().collect();
        circuit.step([("demographics".to_string(), retract)]).unwrap();
        assert!(circuit
            .view_snapshot("transactions_with_demographics")
            .unwrap()
            .is_empty());
        assert!(circuit.view_snapshot("spend_by_city").unwrap().is_empty());
    }

    #[test]
    fn unknown_relations_are_rejected() {
        let mut circuit = circuit();
        assert!(matches!(
            circuit.step([("nope".to_string(), ZSet::new())]),
            Err(RuntimeError::UnknownTable(_))
        ));
        assert!(matches!(circuit.view_snapshot("demographics"), Err(RuntimeError::UnknownView(_))));
    }
}
