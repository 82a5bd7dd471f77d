mod client;

pub use client::{
    ApiErrorClass, ByteStream, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList,
};
