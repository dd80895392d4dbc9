//! Basic usage example for `fieldseal`.

use fieldseal::prelude::*;
use fieldseal_key_file::FileKeyProvider;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("fieldseal Basic Usage Example");
    println!("=============================\n");

    let key_dir = PathBuf::from("./example_keys");
    let provider = FileKeyProvider::init(&key_dir)?;
    println!("✓ Key directory ready at {}\n", key_dir.display());

    let cipher = Cipher::builder().with_provider(&provider)?.normalizer(TrimLowercase).build()?;
    println!("✓ Cipher built, sealing under key {:?}\n", cipher.default_key_id());

    // Write path: store the sealed value and its blind index side by side
    let email = b"Alice@Example.com";
    let (sealed, index) = cipher.seal_indexed(email)?;
    println!("Sealed ({} bytes): {}", sealed.len(), hex_preview(&sealed));
    println!("Blind index:      {index}\n");

    // Read path
    let opened = cipher.open(&sealed)?;
    println!("Opened: {}\n", String::from_utf8_lossy(&opened));

    // Query path: index the search term the same way and compare tokens
    let query = cipher.blind_index(b" alice@example.com")?;
    let condition = search_condition("users.email_bidx", &query)?;
    println!("Query:  SELECT * FROM users WHERE {condition}");
    println!("Match:  {}\n", query == index);

    // Large repetitive values are compressed before sealing
    let document: Vec<u8> = b"lorem ipsum ".iter().copied().cycle().take(8192).collect();
    let sealed_doc = cipher.seal(&document)?;
    println!("Document: {} bytes plain, {} bytes sealed", document.len(), sealed_doc.len());

    Ok(())
}

fn hex_preview(bytes: &[u8]) -> String {
    let shown = bytes.len().min(16);
    format!("{}...", hex::encode(&bytes[..shown]))
}
