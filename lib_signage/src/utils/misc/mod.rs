/// Host, process and machine-identifier information.
pub mod sys_info;
