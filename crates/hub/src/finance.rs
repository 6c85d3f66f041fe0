//! Farm ledger: transactions, categories, vendors, customers and budgets,
//! plus the profitability, cash-flow and budget-utilisation reports built on
//! top of them. Amounts are dollars.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Date, Month};
use tracing::info;
use uuid::Uuid;

use crate::error::{FarmError, FarmResult};
use crate::store::{Record, Store};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub category_id: String,
    pub amount: f64,
    pub date: Date,
    pub description: String,
    pub status: TransactionStatus,
    pub vendor_id: Option<String>,
    pub customer_id: Option<String>,
}

impl Transaction {
    fn counts(&self, kind: TransactionType) -> bool {
        self.status == TransactionStatus::Completed && self.transaction_type == kind
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub category_type: TransactionType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub category_id: String,
    pub allocated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub period_start: Date,
    pub period_end: Date,
    pub lines: Vec<BudgetLine>,
}

impl Record for Transaction {
    const KIND: &'static str = "transaction";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Category {
    const KIND: &'static str = "category";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Vendor {
    const KIND: &'static str = "vendor";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Customer {
    const KIND: &'static str = "customer";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Budget {
    const KIND: &'static str = "budget";
    fn id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub id: Option<String>,
    pub transaction_type: TransactionType,
    pub category_id: String,
    pub amount: f64,
    pub date: Date,
    #[serde(default)]
    pub description: String,
    pub status: TransactionStatus,
    pub vendor_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    pub amount: Option<f64>,
    pub date: Option<Date>,
    pub description: Option<String>,
    pub status: Option<TransactionStatus>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBudget {
    pub id: Option<String>,
    pub name: String,
    pub period_start: Date,
    pub period_end: Date,
    pub lines: Vec<BudgetLine>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
            Self::Winter => "Winter",
        };
        f.write_str(s)
    }
}

/// March to May is Spring, June to August Summer, September to November
/// Fall, the rest Winter.
pub fn get_season(date: Date) -> Season {
    use Month::*;
    match date.month() {
        March | April | May => Season::Spring,
        June | July | August => Season::Summer,
        September | October | November => Season::Fall,
        December | January | February => Season::Winter,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub revenue: f64,
    pub expenses: f64,
    pub profit: f64,
}

impl Totals {
    fn add(&mut self, t: &Transaction) {
        match t.transaction_type {
            TransactionType::Income => self.revenue += t.amount,
            TransactionType::Expense => self.expenses += t.amount,
        }
        self.profit = self.revenue - self.expenses;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitabilityAnalysis {
    pub start: Date,
    pub end: Date,
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub gross_profit: f64,
    /// percent of revenue
    pub gross_margin: f64,
    pub transaction_count: usize,
    pub by_category: BTreeMap<String, Totals>,
    pub by_season: BTreeMap<Season, Totals>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashFlowProjection {
    pub year: i32,
    pub month: Month,
    pub projected_income: f64,
    pub projected_expenses: f64,
    pub net: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLineSummary {
    pub category_id: String,
    pub category_name: String,
    pub allocated: f64,
    pub spent: f64,
    pub remaining: f64,
    /// percent
    pub utilization: f64,
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSummary {
    pub budget_id: String,
    pub name: String,
    pub total_allocated: f64,
    pub total_spent: f64,
    pub utilization: f64,
    pub lines: Vec<BudgetLineSummary>,
}

/// Seasonal weights applied to the trailing monthly average, January first.
/// Revenue follows harvest; spending follows planting.
const INCOME_MULTIPLIERS: [f64; 12] = [0.5, 0.5, 0.6, 0.7, 0.8, 0.9, 1.1, 1.3, 1.6, 1.7, 1.2, 0.8];
const EXPENSE_MULTIPLIERS: [f64; 12] = [0.6, 0.7, 1.2, 1.5, 1.4, 1.1, 1.0, 1.0, 1.1, 1.0, 0.7, 0.6];

fn month_index(m: Month) -> usize {
    usize::from(u8::from(m)) - 1
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

const UNCATEGORIZED: &str = "Uncategorized";

/// Longest cash-flow projection, in months.
pub const MAX_PROJECTION_MONTHS: u32 = 120;

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FinanceService {
    transactions: Store<Transaction>,
    categories: Store<Category>,
    vendors: Store<Vendor>,
    customers: Store<Customer>,
    budgets: Store<Budget>,
}

fn new_id(id: Option<String>) -> String {
    id.unwrap_or_else(|| Uuid::now_v7().to_string())
}

fn validate_amount(amount: f64) -> FarmResult<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(FarmError::validation(format!("amount must be positive (got {amount})")))
    }
}

impl FinanceService {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Transactions -----------------------------------------------------

    pub fn create_transaction(&self, new: NewTransaction) -> FarmResult<Transaction> {
        validate_amount(new.amount)?;
        self.check_category(&new.category_id, new.transaction_type)?;
        if let Some(v) = &new.vendor_id {
            if !self.vendors.contains(v) {
                return Err(FarmError::not_found("vendor", v.as_str()));
            }
        }
        if let Some(c) = &new.customer_id {
            if !self.customers.contains(c) {
                return Err(FarmError::not_found("customer", c.as_str()));
            }
        }

        let tx = self.transactions.insert(Transaction {
            id: new_id(new.id),
            transaction_type: new.transaction_type,
            category_id: new.category_id,
            amount: new.amount,
            date: new.date,
            description: new.description,
            status: new.status,
            vendor_id: new.vendor_id,
            customer_id: new.customer_id,
        })?;
        info!(
            transaction = %tx.id,
            kind = ?tx.transaction_type,
            amount = tx.amount,
            "transaction recorded"
        );
        Ok(tx)
    }

    pub fn get_transaction(&self, id: &str) -> Option<Transaction> {
        self.transactions.get(id)
    }

    /// All transactions, oldest first.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        let mut all = self.transactions.list();
        all.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn update_transaction(
        &self,
        id: &str,
        update: TransactionUpdate,
    ) -> FarmResult<Transaction> {
        if let Some(amount) = update.amount {
            validate_amount(amount)?;
        }
        let kind = self
            .transactions
            .get(id)
            .map(|t| t.transaction_type)
            .ok_or_else(|| FarmError::not_found("transaction", id))?;
        if let Some(cat) = &update.category_id {
            self.check_category(cat, kind)?;
        }

        self.transactions.update(id, |t| {
            if let Some(amount) = update.amount {
                t.amount = amount;
            }
            if let Some(date) = update.date {
                t.date = date;
            }
            if let Some(description) = update.description {
                t.description = description;
            }
            if let Some(status) = update.status {
                t.status = status;
            }
            if let Some(category_id) = update.category_id {
                t.category_id = category_id;
            }
            Ok(t.clone())
        })
    }

    pub fn delete_transaction(&self, id: &str) -> FarmResult<Transaction> {
        self.transactions.remove(id)
    }

    fn check_category(&self, category_id: &str, kind: TransactionType) -> FarmResult<()> {
        let cat = self
            .categories
            .get(category_id)
            .ok_or_else(|| FarmError::not_found("category", category_id))?;
        if cat.category_type != kind {
            return Err(FarmError::validation(format!(
                "category {} is for {:?} transactions, not {kind:?}",
                cat.name, cat.category_type
            )));
        }
        Ok(())
    }

    // -- Categories -------------------------------------------------------

    pub fn create_category(&self, mut category: Category) -> FarmResult<Category> {
        if category.name.trim().is_empty() {
            return Err(FarmError::validation("category name is empty"));
        }
        if category.id.is_empty() {
            category.id = new_id(None);
        }
        self.categories.insert(category)
    }

    pub fn get_category(&self, id: &str) -> Option<Category> {
        self.categories.get(id)
    }

    pub fn all_categories(&self) -> Vec<Category> {
        self.categories.list()
    }

    pub fn update_category(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> FarmResult<Category> {
        self.categories.update(id, |c| {
            if let Some(name) = name {
                c.name = name;
            }
            if description.is_some() {
                c.description = description;
            }
            Ok(c.clone())
        })
    }

    /// Refuses while any transaction or budget line still points at it.
    pub fn delete_category(&self, id: &str) -> FarmResult<Category> {
        let in_use = !self.transactions.filter(|t| t.category_id == id).is_empty()
            || !self
                .budgets
                .filter(|b| b.lines.iter().any(|l| l.category_id == id))
                .is_empty();
        if in_use {
            return Err(FarmError::invalid_state(format!("category {id} is still referenced")));
        }
        self.categories.remove(id)
    }

    // -- Vendors & customers ----------------------------------------------

    pub fn create_vendor(
        &self,
        name: impl Into<String>,
        contact: ContactInfo,
    ) -> FarmResult<Vendor> {
        self.vendors.insert(Vendor {
            id: new_id(None),
            name: name.into(),
            contact,
        })
    }

    pub fn get_vendor(&self, id: &str) -> Option<Vendor> {
        self.vendors.get(id)
    }

    pub fn all_vendors(&self) -> Vec<Vendor> {
        self.vendors.list()
    }

    pub fn update_vendor(
        &self,
        id: &str,
        name: Option<String>,
        contact: Option<ContactInfo>,
    ) -> FarmResult<Vendor> {
        self.vendors.update(id, |v| {
            if let Some(name) = name {
                v.name = name;
            }
            if let Some(contact) = contact {
                v.contact = contact;
            }
            Ok(v.clone())
        })
    }

    pub fn delete_vendor(&self, id: &str) -> FarmResult<Vendor> {
        if !self
            .transactions
            .filter(|t| t.vendor_id.as_deref() == Some(id))
            .is_empty()
        {
            return Err(FarmError::invalid_state(format!("vendor {id} has transactions")));
        }
        self.vendors.remove(id)
    }

    pub fn create_customer(
        &self,
        name: impl Into<String>,
        contact: ContactInfo,
    ) -> FarmResult<Customer> {
        self.customers.insert(Customer {
            id: new_id(None),
            name: name.into(),
            contact,
        })
    }

    pub fn get_customer(&self, id: &str) -> Option<Customer> {
        self.customers.get(id)
    }

    pub fn all_customers(&self) -> Vec<Customer> {
        self.customers.list()
    }

    pub fn update_customer(
        &self,
        id: &str,
        name: Option<String>,
        contact: Option<ContactInfo>,
    ) -> FarmResult<Customer> {
        self.customers.update(id, |c| {
            if let Some(name) = name {
                c.name = name;
            }
            if let Some(contact) = contact {
                c.contact = contact;
            }
            Ok(c.clone())
        })
    }

    pub fn delete_customer(&self, id: &str) -> FarmResult<Customer> {
        if !self
            .transactions
            .filter(|t| t.customer_id.as_deref() == Some(id))
            .is_empty()
        {
            return Err(FarmError::invalid_state(format!("customer {id} has transactions")));
        }
        self.customers.remove(id)
    }

    // -- Budgets ----------------------------------------------------------

    pub fn create_budget(&self, new: NewBudget) -> FarmResult<Budget> {
        if new.period_end < new.period_start {
            return Err(FarmError::validation("budget period ends before it starts"));
        }
        for line in &new.lines {
            if line.allocated < 0.0 {
                return Err(FarmError::validation(format!(
                    "allocation for {} is negative",
                    line.category_id
                )));
            }
            if !self.categories.contains(&line.category_id) {
                return Err(FarmError::not_found("category", line.category_id.as_str()));
            }
        }
        self.budgets.insert(Budget {
            id: new_id(new.id),
            name: new.name,
            period_start: new.period_start,
            period_end: new.period_end,
            lines: new.lines,
        })
    }

    pub fn get_budget(&self, id: &str) -> Option<Budget> {
        self.budgets.get(id)
    }

    pub fn all_budgets(&self) -> Vec<Budget> {
        self.budgets.list()
    }

    pub fn set_budget_line(
        &self,
        id: &str,
        category_id: &str,
        allocated: f64,
    ) -> FarmResult<Budget> {
        if allocated < 0.0 {
            return Err(FarmError::validation("allocation is negative"));
        }
        if !self.categories.contains(category_id) {
            return Err(FarmError::not_found("category", category_id));
        }
        self.budgets.update(id, |b| {
            match b.lines.iter_mut().find(|l| l.category_id == category_id) {
                Some(line) => line.allocated = allocated,
                None => b.lines.push(BudgetLine {
                    category_id: category_id.to_string(),
                    allocated,
                }),
            }
            Ok(b.clone())
        })
    }

    pub fn delete_budget(&self, id: &str) -> FarmResult<Budget> {
        self.budgets.remove(id)
    }

    // -- Reports ----------------------------------------------------------

    fn category_name(&self, id: &str) -> String {
        self.categories
            .get(id)
            .map(|c| c.name)
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }

    /// Completed transactions dated within `[start, end]`.
    pub fn calculate_profitability_analysis(
        &self,
        start: Date,
        end: Date,
    ) -> ProfitabilityAnalysis {
        let txs = self.transactions.filter(|t| {
            t.status == TransactionStatus::Completed && t.date >= start && t.date <= end
        });

        let mut overall = Totals::default();
        let mut by_category: BTreeMap<String, Totals> = BTreeMap::new();
        let mut by_season: BTreeMap<Season, Totals> = BTreeMap::new();
        for t in &txs {
            overall.add(t);
            by_category
                .entry(self.category_name(&t.category_id))
                .or_default()
                .add(t);
            by_season.entry(get_season(t.date)).or_default().add(t);
        }

        ProfitabilityAnalysis {
            start,
            end,
            total_revenue: overall.revenue,
            total_expenses: overall.expenses,
            gross_profit: overall.profit,
            gross_margin: percent(overall.profit, overall.revenue),
            transaction_count: txs.len(),
            by_category,
            by_season,
        }
    }

    /// Project `months` months after `today` from the trailing twelve months
    /// of completed transactions, weighted by the seasonal tables. At most
    /// `MAX_PROJECTION_MONTHS`.
    pub fn project_cash_flow(
        &self,
        months: u32,
        today: Date,
    ) -> FarmResult<Vec<CashFlowProjection>> {
        if months > MAX_PROJECTION_MONTHS {
            return Err(FarmError::validation(format!(
                "months must be at most {MAX_PROJECTION_MONTHS}, got {months}"
            )));
        }
        let since = today.saturating_sub(time::Duration::days(365));
        let window = self.transactions.filter(|t| {
            t.status == TransactionStatus::Completed && t.date > since && t.date <= today
        });
        let avg_income: f64 = window
            .iter()
            .filter(|t| t.counts(TransactionType::Income))
            .map(|t| t.amount)
            .sum::<f64>()
            / 12.0;
        let avg_expense: f64 = window
            .iter()
            .filter(|t| t.counts(TransactionType::Expense))
            .map(|t| t.amount)
            .sum::<f64>()
            / 12.0;

        let mut out = Vec::with_capacity(months as usize);
        let mut year = today.year();
        let mut month = today.month();
        let mut cumulative = 0.0;
        for _ in 0..months {
            if month == Month::December {
                year += 1;
            }
            month = month.next();

            let idx = month_index(month);
            let income = avg_income * INCOME_MULTIPLIERS[idx];
            let expenses = avg_expense * EXPENSE_MULTIPLIERS[idx];
            let net = income - expenses;
            cumulative += net;
            out.push(CashFlowProjection {
                year,
                month,
                projected_income: income,
                projected_expenses: expenses,
                net,
                cumulative,
            });
        }
        Ok(out)
    }

    /// Allocated vs spent per budget line, counting completed expenses
    /// inside the budget period.
    pub fn budget_summary(&self, budget_id: &str) -> FarmResult<BudgetSummary> {
        let budget = self
            .budgets
            .get(budget_id)
            .ok_or_else(|| FarmError::not_found("budget", budget_id))?;
        let expenses = self.transactions.filter(|t| {
            t.counts(TransactionType::Expense)
                && t.date >= budget.period_start
                && t.date <= budget.period_end
        });

        let lines: Vec<BudgetLineSummary> = budget
            .lines
            .iter()
            .map(|line| {
                let spent: f64 = expenses
                    .iter()
                    .filter(|t| t.category_id == line.category_id)
                    .map(|t| t.amount)
                    .sum();
                BudgetLineSummary {
                    category_id: line.category_id.clone(),
                    category_name: self.category_name(&line.category_id),
                    allocated: line.allocated,
                    spent,
                    remaining: line.allocated - spent,
                    utilization: percent(spent, line.allocated),
                    over_budget: spent > line.allocated,
                }
            })
            .collect();

        let total_allocated: f64 = lines.iter().map(|l| l.allocated).sum();
        let total_spent: f64 = lines.iter().map(|l| l.spent).sum();
        Ok(BudgetSummary {
            budget_id: budget.id,
            name: budget.name,
            total_allocated,
            total_spent,
            utilization: percent(total_spent, total_allocated),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn category(id: &str, name: &str, kind: TransactionType) -> Category {
        Category {
            id: id.into(),
            name: name.into(),
            category_type: kind,
            description: None,
        }
    }

    fn service() -> FinanceService {
        let f = FinanceService::new();
        f.create_category(category("sales", "Crop Sales", TransactionType::Income))
            .unwrap();
        f.create_category(category("seed", "Seed", TransactionType::Expense))
            .unwrap();
        f.create_category(category("fuel", "Fuel", TransactionType::Expense))
            .unwrap();
        f
    }

    fn tx(
        kind: TransactionType,
        category_id: &str,
        amount: f64,
        date: Date,
        status: TransactionStatus,
    ) -> NewTransaction {
        NewTransaction {
            id: None,
            transaction_type: kind,
            category_id: category_id.into(),
            amount,
            date,
            description: String::new(),
            status,
            vendor_id: None,
            customer_id: None,
        }
    }

    // -- Seasons ----------------------------------------------------------

    #[test]
    fn season_boundaries() {
        assert_eq!(get_season(date!(2024 - 02 - 29)), Season::Winter);
        assert_eq!(get_season(date!(2024 - 03 - 01)), Season::Spring);
        assert_eq!(get_season(date!(2024 - 05 - 31)), Season::Spring);
        assert_eq!(get_season(date!(2024 - 06 - 01)), Season::Summer);
        assert_eq!(get_season(date!(2024 - 08 - 31)), Season::Summer);
        assert_eq!(get_season(date!(2024 - 09 - 01)), Season::Fall);
        assert_eq!(get_season(date!(2024 - 11 - 30)), Season::Fall);
        assert_eq!(get_season(date!(2024 - 12 - 01)), Season::Winter);
        assert_eq!(get_season(date!(2024 - 01 - 15)), Season::Winter);
    }

    // -- Profitability ----------------------------------------------------

    #[test]
    fn profitability_excludes_pending() {
        let f = service();
        use TransactionStatus::*;
        use TransactionType::*;
        f.create_transaction(tx(Income, "sales", 1000.0, date!(2024 - 06 - 10), Completed))
            .unwrap();
        f.create_transaction(tx(Expense, "seed", 400.0, date!(2024 - 06 - 11), Completed))
            .unwrap();
        f.create_transaction(tx(Expense, "fuel", 200.0, date!(2024 - 06 - 12), Pending))
            .unwrap();

        let p = f.calculate_profitability_analysis(date!(2024 - 01 - 01), date!(2024 - 12 - 31));
        assert_eq!(p.total_revenue, 1000.0);
        assert_eq!(p.total_expenses, 400.0);
        assert_eq!(p.gross_profit, 600.0);
        assert_eq!(p.gross_margin, 60.0);
        assert_eq!(p.transaction_count, 2);
        assert_eq!(p.by_category["Crop Sales"].revenue, 1000.0);
        assert_eq!(p.by_category["Seed"].expenses, 400.0);
        assert!(!p.by_category.contains_key("Fuel"));
        assert_eq!(p.by_season[&Season::Summer].profit, 600.0);
    }

    #[test]
    fn profitability_range_is_inclusive_and_buckets_seasons() {
        let f = service();
        use TransactionStatus::*;
        use TransactionType::*;
        f.create_transaction(tx(Expense, "seed", 300.0, date!(2024 - 03 - 01), Completed))
            .unwrap();
        f.create_transaction(tx(Income, "sales", 900.0, date!(2024 - 10 - 31), Completed))
            .unwrap();
        f.create_transaction(tx(Income, "sales", 50.0, date!(2024 - 11 - 01), Completed))
            .unwrap();

        let p = f.calculate_profitability_analysis(date!(2024 - 03 - 01), date!(2024 - 10 - 31));
        assert_eq!(p.total_revenue, 900.0);
        assert_eq!(p.by_season[&Season::Spring].expenses, 300.0);
        assert_eq!(p.by_season[&Season::Fall].revenue, 900.0);
    }

    #[test]
    fn profitability_without_revenue_has_zero_margin() {
        let f = service();
        f.create_transaction(tx(
            TransactionType::Expense,
            "fuel",
            80.0,
            date!(2024 - 04 - 01),
            TransactionStatus::Completed,
        ))
        .unwrap();
        let p = f.calculate_profitability_analysis(date!(2024 - 01 - 01), date!(2024 - 12 - 31));
        assert_eq!(p.gross_profit, -80.0);
        assert_eq!(p.gross_margin, 0.0);
    }

    // -- Cash flow --------------------------------------------------------

    #[test]
    fn cash_flow_applies_seasonal_multipliers() {
        let f = service();
        use TransactionStatus::*;
        use TransactionType::*;
        f.create_transaction(tx(Income, "sales", 1200.0, date!(2024 - 09 - 15), Completed))
            .unwrap();
        f.create_transaction(tx(Expense, "seed", 600.0, date!(2024 - 04 - 15), Completed))
            .unwrap();
        // older than twelve months: ignored
        f.create_transaction(tx(Income, "sales", 9999.0, date!(2023 - 01 - 15), Completed))
            .unwrap();

        let p = f.project_cash_flow(3, date!(2024 - 11 - 20)).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!((p[0].year, p[0].month), (2024, Month::December));
        assert_eq!((p[1].year, p[1].month), (2025, Month::January));
        assert_eq!((p[2].year, p[2].month), (2025, Month::February));

        // averages: income 100/month, expenses 50/month
        assert!((p[0].projected_income - 80.0).abs() < 1e-9);
        assert!((p[0].projected_expenses - 30.0).abs() < 1e-9);
        assert!((p[1].projected_income - 50.0).abs() < 1e-9);
        let expected_cumulative: f64 = p.iter().map(|m| m.net).sum();
        assert!((p[2].cumulative - expected_cumulative).abs() < 1e-9);
    }

    // -- Budgets ----------------------------------------------------------

    #[test]
    fn budget_summary_flags_over_budget_lines() {
        let f = service();
        use TransactionStatus::*;
        use TransactionType::*;
        let budget = f
            .create_budget(NewBudget {
                id: Some("b2024".into()),
                name: "2024 inputs".into(),
                period_start: date!(2024 - 01 - 01),
                period_end: date!(2024 - 12 - 31),
                lines: vec![
                    BudgetLine {
                        category_id: "seed".into(),
                        allocated: 500.0,
                    },
                    BudgetLine {
                        category_id: "fuel".into(),
                        allocated: 200.0,
                    },
                ],
            })
            .unwrap();
        f.create_transaction(tx(Expense, "seed", 650.0, date!(2024 - 03 - 10), Completed))
            .unwrap();
        f.create_transaction(tx(Expense, "fuel", 50.0, date!(2024 - 05 - 10), Completed))
            .unwrap();
        f.create_transaction(tx(Expense, "fuel", 500.0, date!(2024 - 05 - 11), Pending))
            .unwrap();

        let s = f.budget_summary(&budget.id).unwrap();
        assert_eq!(s.total_allocated, 700.0);
        assert_eq!(s.total_spent, 700.0);
        assert_eq!(s.utilization, 100.0);
        let seed = &s.lines[0];
        assert!(seed.over_budget);
        assert_eq!(seed.remaining, -150.0);
        assert_eq!(seed.category_name, "Seed");
        assert!(!s.lines[1].over_budget);
        assert_eq!(s.lines[1].utilization, 25.0);
    }

    #[test]
    fn budget_summary_unknown_id() {
        let f = service();
        assert!(matches!(
            f.budget_summary("nope"),
            Err(FarmError::NotFound { entity: "budget", .. })
        ));
    }

    // -- CRUD rules -------------------------------------------------------

    #[test]
    fn transaction_requires_known_matching_category() {
        let f = service();
        let err = f
            .create_transaction(tx(
                TransactionType::Income,
                "missing",
                10.0,
                date!(2024 - 01 - 01),
                TransactionStatus::Completed,
            ))
            .unwrap_err();
        assert!(matches!(err, FarmError::NotFound { entity: "category", .. }));

        let err = f
            .create_transaction(tx(
                TransactionType::Income,
                "seed",
                10.0,
                date!(2024 - 01 - 01),
                TransactionStatus::Completed,
            ))
            .unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));
    }

    #[test]
    fn transaction_amount_must_be_positive() {
        let f = service();
        let err = f
            .create_transaction(tx(
                TransactionType::Expense,
                "seed",
                0.0,
                date!(2024 - 01 - 01),
                TransactionStatus::Completed,
            ))
            .unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));
    }

    #[test]
    fn update_transaction_completes_pending() {
        let f = service();
        let t = f
            .create_transaction(tx(
                TransactionType::Expense,
                "fuel",
                200.0,
                date!(2024 - 06 - 12),
                TransactionStatus::Pending,
            ))
            .unwrap();
        let t = f
            .update_transaction(
                &t.id,
                TransactionUpdate {
                    status: Some(TransactionStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(t.status, TransactionStatus::Completed);
        let p = f.calculate_profitability_analysis(date!(2024 - 06 - 01), date!(2024 - 06 - 30));
        assert_eq!(p.total_expenses, 200.0);
    }

    #[test]
    fn referenced_category_and_vendor_cannot_be_deleted() {
        let f = service();
        let v = f.create_vendor("Co-op", ContactInfo::default()).unwrap();
        let mut new = tx(
            TransactionType::Expense,
            "seed",
            10.0,
            date!(2024 - 01 - 01),
            TransactionStatus::Completed,
        );
        new.vendor_id = Some(v.id.clone());
        let t = f.create_transaction(new).unwrap();

        assert!(matches!(f.delete_category("seed"), Err(FarmError::InvalidState(_))));
        assert!(matches!(f.delete_vendor(&v.id), Err(FarmError::InvalidState(_))));

        f.delete_transaction(&t.id).unwrap();
        f.delete_vendor(&v.id).unwrap();
        f.delete_category("seed").unwrap();
        assert!(f.get_category("seed").is_none());
    }

    #[test]
    fn unknown_customer_rejected() {
        let f = service();
        let mut new = tx(
            TransactionType::Income,
            "sales",
            10.0,
            date!(2024 - 01 - 01),
            TransactionStatus::Completed,
        );
        new.customer_id = Some("ghost".into());
        assert!(matches!(
            f.create_transaction(new),
            Err(FarmError::NotFound { entity: "customer", .. })
        ));
    }

    #[test]
    fn cash_flow_horizon_is_capped() {
        let f = service();
        let today = date!(2024 - 06 - 01);
        let p = f.project_cash_flow(MAX_PROJECTION_MONTHS, today).unwrap();
        assert_eq!(p.len(), MAX_PROJECTION_MONTHS as usize);
        assert_eq!(p.last().map(|m| m.year), Some(2034));

        let err = f.project_cash_flow(MAX_PROJECTION_MONTHS + 1, today).unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));
        assert!(f.project_cash_flow(u32::MAX, today).is_err());
    }
}
