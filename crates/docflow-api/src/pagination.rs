//! Shared pagination contract (SPEC_FULL.md §6): `page`/`rows_per_page` are
//! both-or-neither; when given, the response is wrapped with totals, when
//! absent the raw list goes back unwrapped.

use docflow_core::Error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub rows_per_page: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub rows_per_page: i64,
    pub total_pages: i64,
}

/// Either wraps `items` per the pagination contract, or returns it as-is
/// when the caller gave neither `page` nor `rows_per_page`.
pub enum ListOrPage<T: Serialize> {
    List(Vec<T>),
    Page(Paginated<T>),
}

impl<T: Serialize> axum::response::IntoResponse for ListOrPage<T> {
    fn into_response(self) -> axum::response::Response {
        match self {
            ListOrPage::List(items) => axum::Json(items).into_response(),
            ListOrPage::Page(page) => axum::Json(page).into_response(),
        }
    }
}

/// Applies `params` to `all`, either slicing the page out of an in-memory
/// vec (these list sizes are bounded by run-group/batch scope, not global
/// table scans) or passing it through untouched.
pub fn paginate<T: Serialize>(mut all: Vec<T>, params: PageParams) -> Result<ListOrPage<T>, Error> {
    match (params.page, params.rows_per_page) {
        (None, None) => Ok(ListOrPage::List(all)),
        (Some(page), Some(rows_per_page)) => {
            if page < 1 {
                return Err(Error::invalid_input("page must be >= 1"));
            }
            if rows_per_page < 1 {
                return Err(Error::invalid_input("rows_per_page must be >= 1"));
            }
            let total = all.len() as i64;
            let total_pages = (total + rows_per_page - 1) / rows_per_page.max(1);
            let start = ((page - 1) * rows_per_page) as usize;
            let items = if start >= all.len() {
                Vec::new()
            } else {
                let end = (start + rows_per_page as usize).min(all.len());
                all.drain(start..end).collect()
            };
            Ok(ListOrPage::Page(Paginated { items, total, page, rows_per_page, total_pages }))
        }
        _ => Err(Error::invalid_input("page and rows_per_page must be supplied together")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(resp: ListOrPage<i32>) -> Paginated<i32> {
        match resp {
            ListOrPage::Page(p) => p,
            ListOrPage::List(_) => panic!("expected a page"),
        }
    }

    #[test]
    fn no_params_returns_raw_list() {
        let result = paginate(vec![1, 2, 3], PageParams { page: None, rows_per_page: None }).unwrap();
        assert!(matches!(result, ListOrPage::List(v) if v == vec![1, 2, 3]));
    }

    #[test]
    fn pages_compute_total_pages_by_ceiling_division() {
        let result = paginate((1..=7).collect(), PageParams { page: Some(1), rows_per_page: Some(3) }).unwrap();
        let page = page_of(result);
        assert_eq!(page.items, vec![1, 2, 3]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn last_page_is_short() {
        let result = paginate((1..=7).collect(), PageParams { page: Some(3), rows_per_page: Some(3) }).unwrap();
        let page = page_of(result);
        assert_eq!(page.items, vec![7]);
    }

    #[test]
    fn page_below_one_is_rejected() {
        assert!(paginate(vec![1], PageParams { page: Some(0), rows_per_page: Some(1) }).is_err());
    }

    #[test]
    fn only_one_of_the_pair_is_rejected() {
        assert!(paginate(vec![1], PageParams { page: Some(1), rows_per_page: None }).is_err());
    }
}
