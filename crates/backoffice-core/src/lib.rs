pub mod error;
pub mod events;
pub mod models;
pub mod storage;

pub use error::{CreditLimitExceeded, EventError, LedgerConflict, UnknownVariant};
pub use events::{ClientPaymentEvent, CreditProductEvent, TransactionEvent};
pub use models::{
    Account, AccountStatus, ClientProfile, NewProductRegistry, Payment,
    PaymentRegistry, PaymentType, ProductRegistry, ScheduleEntry, Transaction,
    TransactionStatus, TransactionType,
};
pub use storage::{
    AccountIdResolver, AccountStore, AccountUpdate, Clock, ClientProfileLookup, CreditRegistryStore,
    CreditTermLookup, LedgerChanges, LedgerStore, PaymentStore, SystemClock, TransactionStore,
};
