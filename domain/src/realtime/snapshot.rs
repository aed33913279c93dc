use crate::period::Period;
use events::DataType;
use serde::Serialize;
use serde_json::Value;

/// Everything a pull sync fetched for one month.
///
/// A list whose request failed is left empty and its data type is recorded in
/// `failed`, so an empty list alone does not tell a failure from "no rows".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSnapshot {
    pub period: Period,
    pub products: Vec<Value>,
    pub sales: Vec<Value>,
    pub pret_familles: Vec<Value>,
    pub pret_produits: Vec<Value>,
    pub depenses: Vec<Value>,
    pub failed: Vec<DataType>,
}

impl MonthSnapshot {
    pub fn empty(period: Period) -> Self {
        Self {
            period,
            products: Vec::new(),
            sales: Vec::new(),
            pret_familles: Vec::new(),
            pret_produits: Vec::new(),
            depenses: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn get(&self, data_type: DataType) -> &[Value] {
        match data_type {
            DataType::Products => &self.products,
            DataType::Sales => &self.sales,
            DataType::PretFamilles => &self.pret_familles,
            DataType::PretProduits => &self.pret_produits,
            DataType::DepenseDuMois => &self.depenses,
        }
    }

    pub fn set(&mut self, data_type: DataType, items: Vec<Value>) {
        let slot = match data_type {
            DataType::Products => &mut self.products,
            DataType::Sales => &mut self.sales,
            DataType::PretFamilles => &mut self.pret_familles,
            DataType::PretProduits => &mut self.pret_produits,
            DataType::DepenseDuMois => &mut self.depenses,
        };
        *slot = items;
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What `force_sync` ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum ForceSyncOutcome {
    /// The backend accepted the request; fresh data arrives over the stream.
    Requested,
    /// The request failed and a local pull sync ran instead.
    FellBack(MonthSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_by_data_type() {
        let mut snapshot = MonthSnapshot::empty(Period::new(5, 2025).unwrap());
        snapshot.set(DataType::PretProduits, vec![json!({"id": "pp1"})]);

        assert_eq!(snapshot.get(DataType::PretProduits), &[json!({"id": "pp1"})]);
        assert!(snapshot.pret_produits.len() == 1);
        for data_type in [DataType::Products, DataType::Sales, DataType::DepenseDuMois] {
            assert!(snapshot.get(data_type).is_empty());
        }
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_serializes_failed_with_wire_names() {
        let mut snapshot = MonthSnapshot::empty(Period::new(1, 2026).unwrap());
        snapshot.failed.push(DataType::DepenseDuMois);

        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["failed"], json!(["depensedumois"]));
        assert_eq!(value["period"], json!({"month": 1, "year": 2026}));
    }
}
