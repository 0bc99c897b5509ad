use serde::Serialize;

use crate::access::roles::RoleCategory;
use crate::auth::Principal;
use crate::error::{AppError, AppResult};

/// Rows that can be plant-filtered expose their plant code through this
/// accessor. Rows with no resolvable plant (`None`) are never filtered out.
pub trait PlantScoped {
    fn plant_code(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Roles whose members only see rows for their assigned plants. Everyone
/// else (and ADMIN) passes through unfiltered.
const PLANT_SCOPED_ROLES: &[RoleCategory] = &[RoleCategory::Plant];

pub fn is_plant_exempt(principal: &Principal) -> bool {
    if principal.roles.contains(&RoleCategory::Admin) {
        return true;
    }
    !principal
        .roles
        .iter()
        .any(|role| PLANT_SCOPED_ROLES.contains(role))
}

fn owns_plant(principal: &Principal, plant_code: Option<&str>) -> bool {
    match plant_code {
        Some(code) => principal.plants.iter().any(|owned| owned == code),
        None => true,
    }
}

/// Retains only list elements whose plant is assigned to the caller.
/// Applied after fetching; idempotent by construction.
pub fn filter_list<T: PlantScoped>(principal: &Principal, items: Vec<T>) -> Vec<T> {
    if is_plant_exempt(principal) {
        return items;
    }
    items
        .into_iter()
        .filter(|item| owns_plant(principal, item.plant_code()))
        .collect()
}

pub fn filter_page<T: PlantScoped>(principal: &Principal, page: Page<T>) -> Page<T> {
    if is_plant_exempt(principal) {
        return page;
    }
    let items = filter_list(principal, page.items);
    Page {
        total: items.len() as i64,
        items,
        page: page.page,
        per_page: page.per_page,
    }
}

/// Single-item check. With `required` the caller must own the item's plant;
/// without it the item passes through untouched.
pub fn check_single<T: PlantScoped>(
    principal: &Principal,
    item: &T,
    required: bool,
) -> AppResult<()> {
    if is_plant_exempt(principal) {
        return Ok(());
    }
    if owns_plant(principal, item.plant_code()) {
        return Ok(());
    }
    if required {
        return Err(AppError::access_denied(
            "resource belongs to a plant outside your assignment",
        ));
    }
    Ok(())
}

/// Runtime-shaped input for the AUTO filter mode.
pub enum Filterable<T> {
    List(Vec<T>),
    Page(Page<T>),
    Single(T),
}

pub fn filter_auto<T: PlantScoped>(
    principal: &Principal,
    value: Filterable<T>,
    required: bool,
) -> AppResult<Filterable<T>> {
    match value {
        Filterable::List(items) => Ok(Filterable::List(filter_list(principal, items))),
        Filterable::Page(page) => Ok(Filterable::Page(filter_page(principal, page))),
        Filterable::Single(item) => {
            check_single(principal, &item, required)?;
            Ok(Filterable::Single(item))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Row {
        plant: Option<&'static str>,
        label: &'static str,
    }

    impl PlantScoped for Row {
        fn plant_code(&self) -> Option<&str> {
            self.plant
        }
    }

    fn principal(roles: &[RoleCategory], plants: &[&str]) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "tester".to_string(),
            session_id: Uuid::new_v4(),
            roles: roles.to_vec(),
            plants: plants.iter().map(|p| p.to_string()).collect(),
            primary_plant: plants.first().map(|p| p.to_string()),
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { plant: Some("P1"), label: "a" },
            Row { plant: Some("P3"), label: "b" },
        ]
    }

    #[test]
    fn plant_caller_sees_only_owned_rows() {
        let caller = principal(&[RoleCategory::Plant], &["P1", "P2"]);
        let filtered = filter_list(&caller, rows());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].label, "a");
    }

    #[test]
    fn admin_sees_everything() {
        let admin = principal(&[RoleCategory::Admin], &[]);
        assert_eq!(filter_list(&admin, rows()).len(), 2);
    }

    #[test]
    fn non_plant_roles_are_exempt() {
        let reviewer = principal(&[RoleCategory::Cqs], &[]);
        assert_eq!(filter_list(&reviewer, rows()).len(), 2);
    }

    #[test]
    fn filtering_is_idempotent() {
        let caller = principal(&[RoleCategory::Plant], &["P1"]);
        let once = filter_list(&caller, rows());
        let labels: Vec<&str> = once.iter().map(|r| r.label).collect();
        let twice = filter_list(&caller, once);
        assert_eq!(labels, twice.iter().map(|r| r.label).collect::<Vec<_>>());
    }

    #[test]
    fn single_required_denies_unowned() {
        let caller = principal(&[RoleCategory::Plant], &["P1"]);
        let unowned = Row { plant: Some("P9"), label: "x" };
        let err = check_single(&caller, &unowned, true).unwrap_err();
        assert_eq!(err.category(), "access_denied");
        assert!(check_single(&caller, &unowned, false).is_ok());

        let owned = Row { plant: Some("P1"), label: "y" };
        assert!(check_single(&caller, &owned, true).is_ok());
    }

    #[test]
    fn rows_without_plant_pass_through() {
        let caller = principal(&[RoleCategory::Plant], &["P1"]);
        let unscoped = Row { plant: None, label: "z" };
        assert!(check_single(&caller, &unscoped, true).is_ok());
    }

    #[test]
    fn page_filter_adjusts_total() {
        let caller = principal(&[RoleCategory::Plant], &["P1"]);
        let page = Page { items: rows(), total: 2, page: 1, per_page: 50 };
        let filtered = filter_page(&caller, page);
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.items.len(), 1);
    }

    #[test]
    fn auto_mode_dispatches_on_shape() {
        let caller = principal(&[RoleCategory::Plant], &["P1"]);
        match filter_auto(&caller, Filterable::List(rows()), false).unwrap() {
            Filterable::List(items) => assert_eq!(items.len(), 1),
            _ => panic!("expected list"),
        }
        let single = Row { plant: Some("P9"), label: "x" };
        assert!(filter_auto(&caller, Filterable::Single(single), true).is_err());
    }
}
