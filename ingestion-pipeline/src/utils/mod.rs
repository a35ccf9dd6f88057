pub mod pdf_ingestion;
