//! End-to-end attachment lifecycle through the public API

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use stapler_attachments::{
    arrange_files, AttachmentOptions, Hook, Model, ParallelUpload, ResourceKind, Stapler,
    TempDirVerifier, UploadDescriptor,
};
use stapler_core::{Record, StaplerConfig};
use tempfile::tempdir;

fn write_upload(dir: &Path, name: &str, bytes: &[u8]) -> UploadDescriptor {
    let temp = dir.join(format!("upload-{}", name));
    std::fs::write(&temp, bytes).unwrap();
    UploadDescriptor::new(name, "", temp, bytes.len() as u64)
}

#[tokio::test]
async fn test_register_save_resolve_remove_delete() {
    let app = tempdir().unwrap();
    let uploads = tempdir().unwrap();
    let config = StaplerConfig {
        app_root: app.path().to_path_buf(),
        upload_tmp_dir: uploads.path().to_path_buf(),
        ..StaplerConfig::default()
    };

    let mut stapler = Stapler::new(config);
    stapler
        .has_attached_file(
            "App\\Models\\Document",
            "attachment",
            AttachmentOptions::new()
                .url("/files/:class/:id/:style/:filename")
                .default_url("/images/:style/missing.png")
                .style("preview", "200"),
        )
        .unwrap();

    // Register
    let mut document = Model::new("App\\Models\\Document").with_id(42);
    assert_eq!(
        stapler
            .resolve_resource(ResourceKind::Url, &document, "attachment", "preview")
            .await
            .unwrap(),
        "/images/preview/missing.png"
    );

    // Save
    document.attach("attachment", &write_upload(uploads.path(), "report.pdf", b"%PDF-1.7"));
    stapler.dispatch(Hook::BeforeSave, &mut document).await.unwrap();
    assert!(!document.has_attribute("attachment"));
    assert_eq!(
        document.attribute("attachment_content_type"),
        Some(&json!("application/pdf"))
    );
    stapler.dispatch(Hook::AfterSave, &mut document).await.unwrap();

    // Resolve
    let stored = app
        .path()
        .join("public/files/App/Models/Document/42/preview/report.pdf");
    assert_eq!(std::fs::read(&stored).unwrap(), b"%PDF-1.7");
    assert_eq!(
        stapler
            .call(&document, "attachment_url", Some("preview"))
            .await
            .as_deref(),
        Some("/files/App/Models/Document/42/preview/report.pdf")
    );

    // Remove
    document.detach("attachment");
    stapler.dispatch(Hook::BeforeSave, &mut document).await.unwrap();
    stapler.dispatch(Hook::AfterSave, &mut document).await.unwrap();
    assert!(!app.path().join("public/files/App/Models/Document/42").exists());
    assert_eq!(document.attribute("attachment_file_name"), Some(&json!(null)));

    // Delete, twice
    stapler.dispatch(Hook::AfterDelete, &mut document).await.unwrap();
    stapler.dispatch(Hook::AfterDelete, &mut document).await.unwrap();
}

#[tokio::test]
async fn test_multiple_files_under_one_field() {
    let app = tempdir().unwrap();
    let uploads = tempdir().unwrap();

    let mut stapler = Stapler::new(StaplerConfig::with_app_root(app.path()))
        .with_verifier(Arc::new(TempDirVerifier::new(uploads.path())));
    stapler
        .has_attached_file("Photo", "image", AttachmentOptions::new())
        .unwrap();

    let names = ["a.txt", "b.txt", "c.txt"];
    for name in names {
        std::fs::write(uploads.path().join(name), name.as_bytes()).unwrap();
    }

    let payload = ParallelUpload {
        name: names.iter().map(|n| n.to_string()).collect(),
        mime_type: vec!["text/plain".to_string(); 3],
        tmp_name: names.iter().map(|n| uploads.path().join(n)).collect(),
        error: vec![0; 3],
        size: vec![5; 3],
    };

    for (index, upload) in arrange_files(&payload).unwrap().iter().enumerate() {
        let mut photo = Model::new("Photo").with_id(index as i64 + 1);
        photo.attach("image", upload);
        stapler.dispatch(Hook::BeforeSave, &mut photo).await.unwrap();
        stapler.dispatch(Hook::AfterSave, &mut photo).await.unwrap();

        let path = stapler.path(&photo, "image", "").unwrap();
        assert!(Path::new(&path).is_file(), "missing {}", path);
        assert!(path.contains(&format!("/system/Photo/images/000/000/00{}/original/", index + 1)));
    }
}
