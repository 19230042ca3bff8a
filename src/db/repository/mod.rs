pub mod calendar_entry;

pub use calendar_entry::CalendarEntryRepository;
