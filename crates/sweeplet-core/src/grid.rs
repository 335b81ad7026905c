//! Parameter grid expansion

use crate::error::{SweepError, SweepResult};
use crate::param::ParamValue;

/// One point of the grid: parameter name and chosen value, in grid order
pub type GridPoint = Vec<(String, ParamValue)>;

/// Candidate values per parameter, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGrid {
    params: Vec<(String, Vec<ParamValue>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `insert`
    pub fn with<I>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = ParamValue>,
    {
        self.insert(name, values);
        self
    }

    /// Set the candidates for `name`, keeping its position if already present
    pub fn insert<I>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = ParamValue>,
    {
        let name = name.into();
        let values: Vec<ParamValue> = values.into_iter().collect();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = values,
            None => self.params.push((name, values)),
        }
    }

    /// Read a `[grid]` table. Arrays are candidate lists, any other value is
    /// a single candidate.
    pub fn from_toml(table: &toml::Table) -> SweepResult<Self> {
        let mut grid = Self::new();
        for (name, value) in table {
            let values = match value {
                toml::Value::Array(items) => items
                    .iter()
                    .map(ParamValue::from_toml)
                    .collect::<SweepResult<Vec<_>>>()?,
                toml::Value::Table(_) => {
                    return Err(SweepError::Config(format!(
                        "grid parameter '{}' must be a list of values",
                        name
                    )))
                }
                other => vec![ParamValue::from_toml(other)?],
            };
            grid.insert(name.clone(), values);
        }
        Ok(grid)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    pub fn candidates(&self, name: &str) -> Option<&[ParamValue]> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Drop repeated candidates, keeping the first occurrence of each
    pub fn dedup(&mut self) {
        for (_, values) in &mut self.params {
            let mut seen: Vec<ParamValue> = Vec::with_capacity(values.len());
            values.retain(|v| {
                if seen.contains(v) {
                    false
                } else {
                    seen.push(v.clone());
                    true
                }
            });
        }
    }

    /// Number of points `expand` produces
    pub fn job_count(&self) -> usize {
        let mut grid = self.clone();
        grid.dedup();
        grid.params.iter().map(|(_, v)| v.len()).product()
    }

    /// Cartesian product of the de-duplicated candidates, last parameter
    /// varying fastest.
    pub fn expand(&self) -> Vec<GridPoint> {
        let mut grid = self.clone();
        grid.dedup();

        if grid.params.iter().any(|(_, v)| v.is_empty()) {
            return Vec::new();
        }

        let mut points = Vec::with_capacity(grid.job_count());
        let mut indices = vec![0usize; grid.params.len()];

        loop {
            points.push(
                grid.params
                    .iter()
                    .zip(&indices)
                    .map(|((name, values), &i)| (name.clone(), values[i].clone()))
                    .collect(),
            );

            let mut pos = indices.len();
            loop {
                if pos == 0 {
                    return points;
                }
                pos -= 1;
                indices[pos] += 1;
                if indices[pos] < grid.params[pos].1.len() {
                    break;
                }
                indices[pos] = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalars(values: &[i64]) -> Vec<ParamValue> {
        values.iter().map(ParamValue::scalar).collect()
    }

    fn rendered(point: &GridPoint) -> Vec<String> {
        point
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect()
    }

    #[test]
    fn test_expand_order_last_fastest() {
        let grid = ParameterGrid::new()
            .with("model", vec![ParamValue::text("a"), ParamValue::text("b")])
            .with("seed", scalars(&[0, 1, 2]));

        let points = grid.expand();
        assert_eq!(points.len(), 6);
        assert_eq!(rendered(&points[0]), vec!["model=a", "seed=0"]);
        assert_eq!(rendered(&points[1]), vec!["model=a", "seed=1"]);
        assert_eq!(rendered(&points[3]), vec!["model=b", "seed=0"]);
        assert_eq!(rendered(&points[5]), vec!["model=b", "seed=2"]);
    }

    #[test]
    fn test_count_matches_dedup_product() {
        let grid = ParameterGrid::new()
            .with("seed", scalars(&[0, 1, 1, 2, 0]))
            .with("k", scalars(&[2048, 2048]))
            .with("lr", scalars(&[1, 2]));

        assert_eq!(grid.job_count(), 3 * 1 * 2);
        assert_eq!(grid.expand().len(), grid.job_count());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut grid = ParameterGrid::new().with("seed", scalars(&[2, 0, 2, 1, 0]));
        grid.dedup();
        assert_eq!(grid.candidates("seed").unwrap(), scalars(&[2, 0, 1]).as_slice());
    }

    #[test]
    fn test_empty_grid_yields_single_point() {
        let points = ParameterGrid::new().expand();
        assert_eq!(points.len(), 1);
        assert!(points[0].is_empty());
    }

    #[test]
    fn test_empty_candidates_yield_nothing() {
        let grid = ParameterGrid::new()
            .with("seed", scalars(&[0, 1]))
            .with("lr", Vec::new());
        assert_eq!(grid.job_count(), 0);
        assert!(grid.expand().is_empty());
    }

    #[test]
    fn test_from_toml_preserves_order() {
        let table: toml::Table = toml::from_str(
            r#"
optim = ["sgd", "adam"]
milestones = [[82, 123], [50]]
amp = [true, false]
k = 2048
"#,
        )
        .unwrap();
        let grid = ParameterGrid::from_toml(&table).unwrap();

        let names: Vec<&str> = grid.names().collect();
        assert_eq!(names, vec!["optim", "milestones", "amp", "k"]);
        assert_eq!(
            grid.candidates("milestones").unwrap(),
            &[ParamValue::list([82, 123]), ParamValue::list([50])]
        );
        assert_eq!(grid.job_count(), 2 * 2 * 2);
    }
}
