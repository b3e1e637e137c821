mod restart_resume;
mod stream_to_http;
