//! Canonical collection names used by the accounting domain.
//!
//! Every caller goes through these constants rather than spelling collection
//! names inline, so a rename is a one-line change and typos fail to compile.
//! The [`legacy`] module lists the names used by the previous schema, which
//! the migration router still routes reads for.

pub const CUSTOMERS: &str = "customers";
pub const SUPPLIERS: &str = "suppliers";
pub const PRODUCTS: &str = "products";
pub const QUOTES: &str = "quotes";
pub const INVOICES: &str = "invoices";
pub const PURCHASE_INVOICES: &str = "purchaseInvoices";
pub const SUPPLIER_QUOTES: &str = "supplierQuotes";
pub const DELIVERY_NOTES: &str = "deliveryNotes";
pub const DOCUMENTS: &str = "documents";
pub const COMPANY_INFO: &str = "companyInfo";
pub const BANK_ACCOUNTS: &str = "bankAccounts";
pub const JOURNALS: &str = "journals";
pub const FAQ_ITEMS: &str = "faqItems";
pub const FAQ_VOTES: &str = "faqVotes";
pub const AI_CONVERSATIONS: &str = "aiConversations";
pub const CHAT_HISTORIES: &str = "chatHistories";
pub const KNOWLEDGE_BASE: &str = "knowledgeBase";
pub const FILES: &str = "files";
pub const OCR_RESULTS: &str = "ocrResults";
pub const ACCOUNTS: &str = "accounts";
pub const LEARNING_DATA: &str = "learningData";
pub const SYSTEM_LOGS: &str = "systemLogs";

/// All canonical collection names, in declaration order.
pub const ALL: &[&str] = &[
    CUSTOMERS,
    SUPPLIERS,
    PRODUCTS,
    QUOTES,
    INVOICES,
    PURCHASE_INVOICES,
    SUPPLIER_QUOTES,
    DELIVERY_NOTES,
    DOCUMENTS,
    COMPANY_INFO,
    BANK_ACCOUNTS,
    JOURNALS,
    FAQ_ITEMS,
    FAQ_VOTES,
    AI_CONVERSATIONS,
    CHAT_HISTORIES,
    KNOWLEDGE_BASE,
    FILES,
    OCR_RESULTS,
    ACCOUNTS,
    LEARNING_DATA,
    SYSTEM_LOGS,
];

/// Collection names from the previous schema generation.
pub mod legacy {
    pub const INVOICES: &str = "invoices";
    pub const RECEIPTS: &str = "receipts";
    pub const DOCUMENTS: &str = "documents";
    pub const COMPANIES: &str = "companies";
    pub const ACCOUNTS: &str = "accounts";
    pub const TRANSACTIONS: &str = "transactions";
    pub const JOURNAL_ENTRIES: &str = "journal_entries";
    pub const JOURNAL_ENTRY_LINES: &str = "journal_entry_lines";
    pub const PARTNERS: &str = "partners";
    pub const AUDIT_LOGS: &str = "audit_logs";
    pub const OCR_RESULTS: &str = "ocr_results";
    pub const IMPORT_BATCHES: &str = "import_batches";
    pub const ITEMS: &str = "items";
    pub const TAGS: &str = "tags";
    pub const PURCHASE_ORDERS: &str = "purchaseOrders";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for name in ALL {
            assert!(seen.insert(*name), "duplicate collection name {name}");
        }
    }
}
