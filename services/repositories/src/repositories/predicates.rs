//! Composable record filters.
//!
//! A [`PredicateChain`] is a conjunction of predicates. Set predicates match
//! when the field value is one of the requested values; an empty request set
//! adds no constraint at all.
use std::collections::BTreeSet;

type Predicate<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;

pub struct PredicateChain<R> {
    predicates: Vec<Predicate<R>>,
}

impl<R> Default for PredicateChain<R> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }
}

impl<R> PredicateChain<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to be one of `values`. A missing field never matches a
    /// non-empty set.
    pub fn field_in<I, S, F>(mut self, values: I, field: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&R) -> Option<&str> + Send + Sync + 'static,
    {
        let wanted: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if wanted.is_empty() {
            return self;
        }
        self.predicates.push(Box::new(move |record| {
            field(record).is_some_and(|value| wanted.contains(value))
        }));
        self
    }

    /// Require at least one edge of a one-to-many relationship to be one of
    /// `values`.
    pub fn any_edge_in<I, S, F>(mut self, values: I, edges: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&R) -> Vec<&str> + Send + Sync + 'static,
    {
        let wanted: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if wanted.is_empty() {
            return self;
        }
        self.predicates.push(Box::new(move |record| {
            edges(record).into_iter().any(|edge| wanted.contains(edge))
        }));
        self
    }

    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Box::new(predicate));
        self
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, record: &R) -> bool {
        self.predicates.iter().all(|predicate| predicate(record))
    }

    pub fn apply(&self, records: Vec<R>) -> Vec<R> {
        records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Route {
        host: &'static str,
        space: Option<&'static str>,
        apps: Vec<&'static str>,
    }

    fn routes() -> Vec<Route> {
        vec![
            Route {
                host: "api",
                space: Some("s1"),
                apps: vec!["a1", "a2"],
            },
            Route {
                host: "www",
                space: Some("s2"),
                apps: vec!["a3"],
            },
            Route {
                host: "orphan",
                space: None,
                apps: vec![],
            },
        ]
    }

    #[test]
    fn empty_sets_impose_no_constraint() {
        let chain = PredicateChain::<Route>::new()
            .field_in(Vec::<String>::new(), |route| Some(route.host))
            .any_edge_in(Vec::<String>::new(), |route| route.apps.clone());
        assert!(chain.is_empty());
        assert_eq!(chain.apply(routes()).len(), 3);
    }

    #[test]
    fn values_within_a_field_are_alternatives() {
        let chain = PredicateChain::<Route>::new().field_in(["api", "www"], |route| Some(route.host));
        assert_eq!(chain.apply(routes()).len(), 2);
    }

    #[test]
    fn fields_are_combined_with_and() {
        let chain = PredicateChain::<Route>::new()
            .field_in(["api", "www"], |route| Some(route.host))
            .field_in(["s2"], |route| route.space);
        let hosts: Vec<_> = chain.apply(routes()).into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["www"]);
    }

    #[test]
    fn missing_field_does_not_match_requested_values() {
        let chain = PredicateChain::<Route>::new().field_in(["s1"], |route| route.space);
        assert!(!chain.matches(&routes()[2]));
    }

    #[test]
    fn any_edge_matches_one_to_many_relationships() {
        let chain = PredicateChain::<Route>::new().any_edge_in(["a2"], |route| route.apps.clone());
        let hosts: Vec<_> = chain.apply(routes()).into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["api"]);
    }

    #[test]
    fn custom_predicates_compose() {
        let chain = PredicateChain::<Route>::new()
            .matching(|route| !route.apps.is_empty())
            .field_in(["api", "orphan"], |route| Some(route.host));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.apply(routes()).len(), 1);
    }
}
